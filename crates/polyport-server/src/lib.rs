//! Polyport server — owns one [`ServerContext`](polyport_transport::ServerContext)
//! and every configured transport, and starts/stops them as a unit.

pub mod config;
pub mod error;
pub mod server;

pub use config::{ListenerConfig, ServerConfig};
pub use error::ServerError;
pub use server::{Server, build_transport, shutdown_signal};
