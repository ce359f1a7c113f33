//! Request and response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, StatusCode};

/// One client request line: `{"method": "POST", "path": "/messages", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub data: Value,
}

/// One server response line: `{"status": 200, "data": ...}` or
/// `{"status": 400, "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of dispatching one request.
pub type HandlerResult = Result<Option<Value>, ProtocolError>;

// ─────────────────────────────────────────────────────────────────────────────
// Helper constructors
// ─────────────────────────────────────────────────────────────────────────────

impl Request {
    pub fn new(method: impl Into<String>, data: Value) -> Self {
        Self {
            method: method.into(),
            path: String::new(),
            data,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

impl Response {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            status: StatusCode::Ok.code(),
            data,
            error: None,
        }
    }

    pub fn error(err: &ProtocolError) -> Self {
        Self {
            status: err.status,
            data: None,
            error: Some(err.message.clone()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_code(self.status)
    }
}

impl From<HandlerResult> for Response {
    fn from(result: HandlerResult) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::error(&err),
        }
    }
}
