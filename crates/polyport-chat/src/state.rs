//! Chat state: the message log and the set of joined connections.
//!
//! Each structure has its own lock, held only for the in-memory operation.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use polyport_protocol::ChatMessage;

/// Append-only, ordered message log.
#[derive(Default)]
pub struct MessageLog {
    messages: RwLock<Vec<ChatMessage>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, assigning its id and timestamp under the lock so ids
    /// follow log order.
    pub fn append(&self, user: &str, message: &str, room: Option<&str>) -> ChatMessage {
        let mut messages = self.messages.write();
        let entry = ChatMessage {
            id: messages.len() as u64 + 1,
            user: user.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            room: room.map(str::to_string),
        };
        messages.push(entry.clone());
        entry
    }

    /// Copy of the log, or of the messages posted to `room`.
    pub fn snapshot(&self, room: Option<&str>) -> Vec<ChatMessage> {
        let messages = self.messages.read();
        match room {
            None => messages.clone(),
            Some(room) => messages
                .iter()
                .filter(|m| m.room.as_deref() == Some(room))
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

/// Connection ids that have joined, each with the room it joined (if any).
#[derive(Default)]
pub struct ActiveSet {
    members: RwLock<HashMap<String, Option<String>>>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join, or move to another room if already joined. Returns true if the
    /// id was not a member before.
    pub fn join(&self, id: &str, room: Option<&str>) -> bool {
        self.members
            .write()
            .insert(id.to_string(), room.map(str::to_string))
            .is_none()
    }

    /// Returns true if the id was a member.
    pub fn leave(&self, id: &str) -> bool {
        self.members.write().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.read().contains_key(id)
    }

    /// The room `id` joined, `Some(None)` for a room-less member.
    pub fn room_of(&self, id: &str) -> Option<Option<String>> {
        self.members.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.members.read().keys().cloned().collect()
    }

    /// Members that should receive a message posted to `room`, minus
    /// `exclude`.
    ///
    /// A member joined to a room gets that room's messages and room-less
    /// ones; a member joined without a room gets everything.
    pub fn recipients(&self, exclude: &str, room: Option<&str>) -> Vec<String> {
        self.members
            .read()
            .iter()
            .filter(|(id, _)| id.as_str() != exclude)
            .filter(|(_, joined)| match (joined.as_deref(), room) {
                (None, _) | (_, None) => true,
                (Some(joined), Some(room)) => joined == room,
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}
