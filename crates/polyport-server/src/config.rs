//! Server configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use polyport_transport::{DEFAULT_SHUTDOWN_TIMEOUT, WebSocketConfig};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// One listening endpoint.
///
/// JSON form: `{"type": "tcp", "addr": "127.0.0.1:7070"}`,
/// `{"type": "unix", "path": "/tmp/polyport.sock"}`,
/// `{"type": "named_pipe", "name": "polyport"}`,
/// `{"type": "websocket", "addr": "127.0.0.1:8080", "path": "/ws"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListenerConfig {
    Tcp {
        addr: String,
    },
    Unix {
        path: PathBuf,
    },
    NamedPipe {
        name: String,
    },
    #[serde(rename = "websocket")]
    WebSocket(WebSocketConfig),
}

impl fmt::Display for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { addr } => write!(f, "tcp://{addr}"),
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
            Self::NamedPipe { name } => write!(f, "pipe://{name}"),
            Self::WebSocket(ws) => write!(f, "ws://{}{}", ws.addr, ws.path),
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name reported in stats and the health endpoint
    pub name: String,
    /// Endpoints to listen on
    pub listeners: Vec<ListenerConfig>,
    /// How long each transport waits for its workers on stop
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "polyport".into(),
            listeners: Vec::new(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ServerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_listener(mut self, listener: ListenerConfig) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
