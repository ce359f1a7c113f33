//! Server — one shared context behind every configured transport.

use std::sync::Arc;
use std::time::Duration;

use polyport_transport::{
    Handler, NamedPipeTransport, Protocol, ServerContext, ServerInfo, TcpTransport, Transport,
    TransportError, UnixTransport, WebSocketTransport,
};
use tracing::{error, info, warn};

use crate::config::{ListenerConfig, ServerConfig};
use crate::error::ServerError;

/// Build the transport for one listener entry. Fails for transports the
/// platform cannot provide.
pub fn build_transport(
    listener: &ListenerConfig,
    shutdown_timeout: Duration,
) -> Result<Box<dyn Transport>, TransportError> {
    let transport: Box<dyn Transport> = match listener {
        ListenerConfig::Tcp { addr } => {
            Box::new(TcpTransport::new(addr.clone()).with_shutdown_timeout(shutdown_timeout))
        }
        ListenerConfig::Unix { path } => {
            Box::new(UnixTransport::new(path.clone())?.with_shutdown_timeout(shutdown_timeout))
        }
        ListenerConfig::NamedPipe { name } => {
            Box::new(NamedPipeTransport::new(name)?.with_shutdown_timeout(shutdown_timeout))
        }
        ListenerConfig::WebSocket(config) => Box::new(
            WebSocketTransport::new(config.clone()).with_shutdown_timeout(shutdown_timeout),
        ),
    };
    Ok(transport)
}

struct Endpoint {
    label: String,
    transport: Box<dyn Transport>,
}

pub struct Server {
    ctx: Arc<ServerContext>,
    endpoints: Vec<Endpoint>,
}

impl Server {
    /// Build the shared context and one transport per configured listener.
    /// Nothing is bound until [`start`](Self::start).
    pub fn new(config: &ServerConfig, handler: Arc<dyn Handler>) -> Result<Self, ServerError> {
        if config.listeners.is_empty() {
            return Err(ServerError::NoListeners);
        }

        let info = ServerInfo::new(config.name.clone(), env!("CARGO_PKG_VERSION"));
        let ctx = Arc::new(ServerContext::with_handler(info, handler));

        let endpoints = config
            .listeners
            .iter()
            .map(|listener| {
                let label = listener.to_string();
                build_transport(listener, config.shutdown_timeout())
                    .map(|transport| Endpoint { label: label.clone(), transport })
                    .map_err(|source| ServerError::Setup { listener: label, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { ctx, endpoints })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn is_running(&self) -> bool {
        self.endpoints.iter().any(|e| e.transport.is_running())
    }

    /// Bound address of the first running transport for `protocol`.
    pub fn local_addr(&self, protocol: Protocol) -> Option<String> {
        self.endpoints
            .iter()
            .filter(|e| e.transport.protocol() == protocol)
            .find_map(|e| e.transport.local_addr())
    }

    /// `(protocol, address)` for every running transport.
    pub fn local_addrs(&self) -> Vec<(Protocol, String)> {
        self.endpoints
            .iter()
            .filter_map(|e| Some((e.transport.protocol(), e.transport.local_addr()?)))
            .collect()
    }

    /// Start every transport in order. If one fails, the ones already
    /// started are stopped again before the error is returned.
    pub async fn start(&self) -> Result<(), ServerError> {
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if let Err(source) = endpoint.transport.start(self.ctx.clone()).await {
                error!("Failed to start {}: {source}", endpoint.label);
                for started in self.endpoints[..i].iter().rev() {
                    if let Err(e) = started.transport.stop().await {
                        warn!("Failed to stop {} during rollback: {e}", started.label);
                    }
                }
                return Err(ServerError::Start {
                    listener: endpoint.label.clone(),
                    source,
                });
            }
        }
        info!(
            "{} v{} started ({} listener(s))",
            self.ctx.info().name,
            self.ctx.info().version,
            self.endpoints.len()
        );
        Ok(())
    }

    /// Stop every transport, even if some fail. Errors are aggregated.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut failures = Vec::new();
        for endpoint in &self.endpoints {
            if let Err(e) = endpoint.transport.stop().await {
                warn!("Failed to stop {}: {e}", endpoint.label);
                failures.push((endpoint.label.clone(), e));
            }
        }
        if failures.is_empty() {
            info!("{} stopped", self.ctx.info().name);
            Ok(())
        } else {
            Err(ServerError::Stop(failures))
        }
    }

    /// Wait for Ctrl-C / SIGTERM, then stop.
    pub async fn run_until_shutdown(&self) -> Result<(), ServerError> {
        shutdown_signal().await;
        self.stop().await
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
