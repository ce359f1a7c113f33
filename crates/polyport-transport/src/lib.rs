//! Polyport transport layer
//!
//! Accepts clients over TCP, Unix domain sockets, Windows named pipes and
//! WebSocket, and presents every connection to the application the same way:
//! - a [`ConnectionRecord`] registered in a shared [`ConnectionRegistry`]
//! - one [`Handler::handle`] call per connection with a byte-stream
//!   [`ConnReader`] / [`ConnWriter`] pair
//! - bounded shutdown: [`Transport::stop`] closes connections directly
//!   instead of waiting for peers
//!
//! The application is plugged in through [`ServerContext::set_handler`].

pub mod connection;
pub mod context;
pub mod error;
pub mod framing;
pub mod io;
mod lifecycle;
pub mod pipe;
pub mod registry;
pub mod tcp;
pub mod transport;
pub mod unix;
pub mod websocket;
pub mod worker;

pub use connection::{ConnectionRecord, Protocol, next_connection_id};
pub use context::{Handler, RequestContext, ServerContext, ServerInfo, ServerStats};
pub use error::{
    CloseAllError, CloseFailure, ConnectionClosed, TransportError, closed_error,
    is_expected_disconnect, is_expected_error,
};
pub use framing::{Frame, FrameReader, MAX_FRAME_LEN, write_frame, write_json};
pub use io::{ConnReader, ConnWriter, split_stream};
pub use lifecycle::DEFAULT_SHUTDOWN_TIMEOUT;
pub use pipe::{NamedPipeTransport, normalize_pipe_name};
pub use registry::{ConnectionRegistry, ConnectionStats};
pub use tcp::TcpTransport;
pub use transport::Transport;
pub use unix::UnixTransport;
pub use websocket::{WebSocketConfig, WebSocketTransport};
pub use worker::{Accepted, serve_connection};

pub use tokio_util::sync::CancellationToken;
