//! Per-connection record tracked by the registry.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::io::{ConnReader, ConnWriter};

/// Which transport accepted a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Unix,
    NamedPipe,
    WebSocket,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Unix => "unix",
            Self::NamedPipe => "namedpipe",
            Self::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fresh connection id: `<protocol>-<uuid v7>`. v7 ids carry a millisecond
/// timestamp plus a monotonic counter, so they never repeat within a process.
pub fn next_connection_id(protocol: Protocol) -> String {
    format!("{}-{}", protocol.as_str(), uuid::Uuid::now_v7().simple())
}

/// One live connection.
///
/// Created by a transport right after accept, owned by the
/// [`ConnectionRegistry`](crate::ConnectionRegistry) once registered, and
/// removed by the same worker that registered it.
pub struct ConnectionRecord {
    /// Unique connection id
    pub id: String,
    /// Remote address descriptor (socket address, socket path, pipe instance)
    pub remote: String,
    pub protocol: Protocol,
    pub connected_at: DateTime<Utc>,
    pub reader: Arc<dyn ConnReader>,
    pub writer: Arc<dyn ConnWriter>,
    /// Free-form protocol/application state, e.g. a selected database number.
    metadata: RwLock<HashMap<String, Value>>,
}

impl ConnectionRecord {
    pub fn new(
        protocol: Protocol,
        remote: impl Into<String>,
        reader: Arc<dyn ConnReader>,
        writer: Arc<dyn ConnWriter>,
    ) -> Self {
        Self::with_id(next_connection_id(protocol), protocol, remote, reader, writer)
    }

    pub fn with_id(
        id: impl Into<String>,
        protocol: Protocol,
        remote: impl Into<String>,
        reader: Arc<dyn ConnReader>,
        writer: Arc<dyn ConnWriter>,
    ) -> Self {
        Self {
            id: id.into(),
            remote: remote.into(),
            protocol,
            connected_at: Utc::now(),
            reader,
            writer,
            metadata: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.metadata.write().insert(key.into(), value)
    }

    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.read().get(key).cloned()
    }

    pub fn remove_metadata(&self, key: &str) -> Option<Value> {
        self.metadata.write().remove(key)
    }

    pub fn metadata_snapshot(&self) -> HashMap<String, Value> {
        self.metadata.read().clone()
    }

    /// Close both halves. Both are always attempted; the reader's error wins
    /// if both fail.
    pub async fn close(&self) -> io::Result<()> {
        let read = self.reader.close().await;
        let write = self.writer.close().await;
        read.and(write)
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_closed() || self.writer.is_closed()
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("protocol", &self.protocol)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
