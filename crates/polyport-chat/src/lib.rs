//! Polyport chat application
//!
//! A [`Handler`](polyport_transport::Handler) that keeps an in-memory message
//! log and a set of joined connections. Every transport feeds the same
//! handler, so a POST over TCP reaches peers joined over WebSocket.

pub mod chat;
pub mod state;

pub use chat::{BROADCAST_WRITE_TIMEOUT, BroadcastReport, ChatHandler};
pub use state::{ActiveSet, MessageLog};
