//! Polyport chat protocol types.
//!
//! Newline-delimited JSON: one request object per line from the client
//! (`{method, path, data}`), one response object per line from the server
//! (`{status, data, error}`), interleaved with broadcast chat messages.
//! This crate is the single source of truth for status codes, method names
//! and payload shapes. It performs no I/O.

pub mod chat;
pub mod error;
pub mod message;
pub mod methods;

pub use chat::{ChatMessage, PostParams, RoomParams};
pub use error::{ProtocolError, StatusCode};
pub use message::{HandlerResult, Request, Response};
pub use methods::{Method, Methods};
