//! Chat payloads: request parameters and the stored/broadcast message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A message in the log. Serialized as-is when broadcast to joined peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub user: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

/// Parameters for `POST`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostParams {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
}

impl PostParams {
    /// Returns `(user, message)` or a 400 naming the first missing field.
    /// Blank strings count as missing.
    pub fn require(&self) -> Result<(&str, &str), ProtocolError> {
        let user = non_blank(self.user.as_deref())
            .ok_or_else(|| ProtocolError::bad_request("Missing required field: user"))?;
        let message = non_blank(self.message.as_deref())
            .ok_or_else(|| ProtocolError::bad_request("Missing required field: message"))?;
        Ok((user, message))
    }

    pub fn room(&self) -> Option<&str> {
        non_blank(self.room.as_deref())
    }
}

/// Parameters for `GET`, `JOIN` and `LEAVE`: an optional room.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomParams {
    #[serde(default)]
    pub room: Option<String>,
}

impl RoomParams {
    pub fn room(&self) -> Option<&str> {
        non_blank(self.room.as_deref())
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
