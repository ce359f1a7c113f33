//! TCP transport.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tracing::debug;

use crate::connection::Protocol;
use crate::context::ServerContext;
use crate::error::TransportError;
use crate::lifecycle::{Lifecycle, StreamListener};
use crate::transport::Transport;
use crate::worker::Accepted;

pub struct TcpTransport {
    addr: String,
    lifecycle: Lifecycle,
}

impl TcpTransport {
    /// `addr` is a `host:port` pair; port 0 picks a free port.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            lifecycle: Lifecycle::new(Protocol::Tcp),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.set_shutdown_timeout(timeout);
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

struct TcpAcceptor {
    listener: TcpListener,
    local_addr: String,
}

impl StreamListener for TcpAcceptor {
    async fn accept(&mut self) -> io::Result<Accepted> {
        let (stream, peer) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {peer}: {e}");
        }
        Ok(Accepted::from_stream(Protocol::Tcp, peer.to_string(), stream, None))
    }

    fn local_addr(&self) -> String {
        self.local_addr.clone()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn start(&self, ctx: Arc<ServerContext>) -> Result<(), TransportError> {
        let addr = self.addr.clone();
        self.lifecycle
            .start(ctx, || async move {
                let listener = TcpListener::bind(&addr)
                    .await
                    .map_err(|source| TransportError::Bind {
                        addr: addr.clone(),
                        source,
                    })?;
                let local_addr = listener.local_addr()?.to_string();
                Ok(TcpAcceptor {
                    listener,
                    local_addr,
                })
            })
            .await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.lifecycle.stop().await
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    fn local_addr(&self) -> Option<String> {
        self.lifecycle.local_addr()
    }
}
