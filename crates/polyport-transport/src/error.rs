//! Transport errors and disconnect classification.
//!
//! Peers go away all the time: EOF, resets, broken pipes, and reads that fail
//! because `Stop` closed the connection underneath them. Those are expected
//! and logged at debug level. Everything else is a real failure.

use std::fmt;
use std::io;

use crate::connection::Protocol;

/// Errors surfaced by [`Transport::start`](crate::Transport::start) and
/// [`Transport::stop`](crate::Transport::stop).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0} transport is already running")]
    AlreadyRunning(Protocol),

    #[error("{protocol} transport is not supported on this platform: {reason}")]
    Unsupported { protocol: Protocol, reason: String },

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid {protocol} transport configuration: {reason}")]
    Config { protocol: Protocol, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Shutdown(#[from] CloseAllError),
}

impl TransportError {
    pub fn unsupported(protocol: Protocol, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            protocol,
            reason: reason.into(),
        }
    }
}

/// One connection that failed to close cleanly.
#[derive(Debug)]
pub struct CloseFailure {
    pub id: String,
    pub error: io::Error,
}

/// Aggregate of every non-benign close failure seen by
/// [`ConnectionRegistry::close_all_connections`](crate::ConnectionRegistry::close_all_connections).
#[derive(Debug, thiserror::Error)]
pub struct CloseAllError {
    pub failures: Vec<CloseFailure>,
}

impl fmt::Display for CloseAllError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to close {} connection(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{} ({})", failure.id, failure.error)?;
        }
        Ok(())
    }
}

/// Marker carried inside the `io::Error` returned by reads and writes on a
/// connection that has been closed locally.
#[derive(Debug, thiserror::Error)]
#[error("use of closed connection")]
pub struct ConnectionClosed;

/// The error every adapter returns once its connection is closed.
pub fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, ConnectionClosed)
}

/// Phrases used by errors that were flattened to strings somewhere along the
/// way (for example by a handler wrapping an I/O error in its own type).
const EXPECTED_PHRASES: &[&str] = &[
    "broken pipe",
    "connection reset",
    "use of closed",
    "end of file",
    "unexpected eof",
    "pipe is being closed",
    "no process is on the other end of the pipe",
];

// Win32 codes for a named pipe whose peer has gone.
#[cfg(windows)]
const PIPE_DISCONNECT_CODES: &[i32] = &[
    109, // ERROR_BROKEN_PIPE
    232, // ERROR_NO_DATA
    233, // ERROR_PIPE_NOT_CONNECTED
];

/// True if `err` is the normal way a connection ends: EOF, reset, broken
/// pipe, a disconnected named pipe, or a read/write on a closed connection.
pub fn is_expected_disconnect(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected => return true,
        _ => {}
    }
    if err.get_ref().is_some_and(|inner| inner.is::<ConnectionClosed>()) {
        return true;
    }
    #[cfg(windows)]
    if err
        .raw_os_error()
        .is_some_and(|code| PIPE_DISCONNECT_CODES.contains(&code))
    {
        return true;
    }
    has_expected_phrase(&err.to_string())
}

/// Handler-level variant of [`is_expected_disconnect`]: walks the error chain
/// looking for an I/O cause, then falls back to the rendered message.
pub fn is_expected_error(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if is_expected_disconnect(io_err) {
                return true;
            }
        }
        if cause.is::<ConnectionClosed>() {
            return true;
        }
    }
    has_expected_phrase(&format!("{err:#}"))
}

fn has_expected_phrase(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    EXPECTED_PHRASES.iter().any(|phrase| message.contains(phrase))
}
