//! Server context, request context, and the handler contract.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionRecord;
use crate::io::{ConnReader, ConnWriter};
use crate::registry::{ConnectionRegistry, ConnectionStats};

/// Static metadata about a running server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            started_at: Utc::now(),
        }
    }
}

/// The application entry point, invoked once per connection.
///
/// Implementations loop internally, consuming one request per iteration,
/// and return only when the connection's useful life is over. Returning an
/// error never affects other connections; disconnect-class errors are not
/// even logged as failures.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: RequestContext,
        reader: Arc<dyn ConnReader>,
        writer: Arc<dyn ConnWriter>,
    ) -> anyhow::Result<()>;
}

/// Everything a handler gets to know about the connection it serves.
#[derive(Clone)]
pub struct RequestContext {
    pub server: Arc<ServerInfo>,
    pub conn: Arc<ConnectionRecord>,
    pub connections: Arc<ConnectionRegistry>,
    /// Fires when the owning transport starts stopping.
    pub shutdown: CancellationToken,
}

/// Registry + metadata + the single handler for one server instance.
pub struct ServerContext {
    info: Arc<ServerInfo>,
    connections: Arc<ConnectionRegistry>,
    handler: RwLock<Option<Arc<dyn Handler>>>,
}

/// Snapshot returned by [`ServerContext::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub server: ServerInfo,
    pub connections: ConnectionStats,
    pub has_handler: bool,
}

impl ServerContext {
    pub fn new(info: ServerInfo) -> Self {
        Self {
            info: Arc::new(info),
            connections: Arc::new(ConnectionRegistry::new()),
            handler: RwLock::new(None),
        }
    }

    pub fn with_handler(info: ServerInfo, handler: Arc<dyn Handler>) -> Self {
        let ctx = Self::new(info);
        ctx.set_handler(handler);
        ctx
    }

    pub fn info(&self) -> &Arc<ServerInfo> {
        &self.info
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn set_handler(&self, handler: Arc<dyn Handler>) {
        *self.handler.write() = Some(handler);
    }

    pub fn handler(&self) -> Option<Arc<dyn Handler>> {
        self.handler.read().clone()
    }

    /// Build the per-connection context passed to [`Handler::handle`].
    pub fn request_context(
        &self,
        conn: Arc<ConnectionRecord>,
        shutdown: CancellationToken,
    ) -> RequestContext {
        RequestContext {
            server: self.info.clone(),
            conn,
            connections: self.connections.clone(),
            shutdown,
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            server: (*self.info).clone(),
            connections: self.connections.stats(),
            has_handler: self.handler.read().is_some(),
        }
    }
}
