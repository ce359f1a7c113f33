//! Status codes and the structured error reported back to clients.

use serde::{Deserialize, Serialize};

/// HTTP-flavoured status codes used in chat responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
    InternalError,
    ServiceUnavailable,

    // Custom code
    Custom(u16),
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::PayloadTooLarge => 413,
            Self::InternalError => 500,
            Self::ServiceUnavailable => 503,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            200 => Self::Ok,
            400 => Self::BadRequest,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            413 => Self::PayloadTooLarge,
            500 => Self::InternalError,
            503 => Self::ServiceUnavailable,
            c => Self::Custom(c),
        }
    }

    /// True for the 4xx range: the client sent something we refuse.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code())
    }
}

/// A request-level failure. Reported to the offending connection as a
/// response; it never closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Protocol Error [{status}]: {message}")]
pub struct ProtocolError {
    pub status: u16,
    pub message: String,
}

impl ProtocolError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: status.code(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest, message)
    }

    pub fn method_not_allowed(method: &str) -> Self {
        Self::new(StatusCode::MethodNotAllowed, format!("Method not allowed: {method}"))
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PayloadTooLarge,
            format!("Request exceeds {limit} bytes"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalError, message)
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_code(self.status)
    }
}
