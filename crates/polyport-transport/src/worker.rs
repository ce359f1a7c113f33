//! The per-connection worker shared by every transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{ConnectionRecord, Protocol};
use crate::context::ServerContext;
use crate::error::is_expected_error;
use crate::io::{ConnReader, ConnWriter, split_stream};
use crate::registry::ConnectionRegistry;

/// A connection fresh out of an accept loop (or a WebSocket upgrade).
pub struct Accepted {
    pub protocol: Protocol,
    pub remote: String,
    pub reader: Arc<dyn ConnReader>,
    pub writer: Arc<dyn ConnWriter>,
}

impl Accepted {
    /// Wrap a bidirectional byte stream.
    pub fn from_stream<S>(
        protocol: Protocol,
        remote: impl Into<String>,
        stream: S,
        write_timeout: Option<Duration>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = split_stream(stream, write_timeout);
        Self {
            protocol,
            remote: remote.into(),
            reader,
            writer,
        }
    }
}

/// Removes the record from the registry when the worker exits, however it
/// exits (return, error, or the task being dropped).
struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    record: Arc<ConnectionRecord>,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if self.registry.remove_record(&self.record) {
            debug!(conn_id = %self.record.id, "connection unregistered");
        }
    }
}

/// Drive one connection from registration to removal.
///
/// The handler is invoked exactly once. If `shutdown` fires while it is still
/// running, the connection is closed underneath it so that a handler parked on
/// a read returns instead of waiting for the peer.
pub async fn serve_connection(ctx: Arc<ServerContext>, accepted: Accepted, shutdown: CancellationToken) {
    let Accepted {
        protocol,
        remote,
        reader,
        writer,
    } = accepted;

    let record = Arc::new(ConnectionRecord::new(
        protocol,
        remote,
        reader.clone(),
        writer.clone(),
    ));
    ctx.connections().add_connection(record.clone());
    let _guard = RegistrationGuard {
        registry: ctx.connections().clone(),
        record: record.clone(),
    };

    debug!(
        conn_id = %record.id,
        remote = %record.remote,
        %protocol,
        "connection opened"
    );

    let Some(handler) = ctx.handler() else {
        warn!(conn_id = %record.id, "no handler configured; closing connection");
        let _ = record.close().await;
        return;
    };

    let request = ctx.request_context(record.clone(), shutdown.clone());
    let handle = handler.handle(request, reader, writer);
    tokio::pin!(handle);

    let result = tokio::select! {
        res = &mut handle => res,
        _ = shutdown.cancelled() => {
            let _ = record.close().await;
            handle.await
        }
    };

    match result {
        Ok(()) => debug!(conn_id = %record.id, "handler finished"),
        Err(e) if is_expected_error(&e) => {
            debug!(conn_id = %record.id, "connection ended: {e:#}")
        }
        Err(e) => warn!(conn_id = %record.id, %protocol, "handler error: {e:#}"),
    }

    if let Err(e) = record.close().await {
        debug!(conn_id = %record.id, "close after handler: {e}");
    }
}
