use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::Protocol;
use crate::context::ServerContext;
use crate::error::TransportError;

/// A listening endpoint for one protocol.
///
/// `start` returns once the listener is bound and accepting; the accept loop
/// runs on its own task. `stop` is idempotent and returns only after the
/// accept loop and every per-connection worker have exited (or the shutdown
/// timeout has elapsed).
#[async_trait]
pub trait Transport: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn start(&self, ctx: Arc<ServerContext>) -> Result<(), TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;

    fn is_running(&self) -> bool;

    /// The bound address while running. Useful when binding to port 0.
    fn local_addr(&self) -> Option<String>;
}
