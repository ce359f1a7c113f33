//! Windows named pipe transport.
//!
//! A pipe instance serves exactly one client, so the listener keeps one
//! unconnected instance waiting and creates the next as soon as a client
//! connects. On other platforms the constructor fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::connection::Protocol;
use crate::context::ServerContext;
use crate::error::TransportError;
use crate::lifecycle::Lifecycle;
use crate::transport::Transport;

const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Bound on each write to a pipe client.
pub const PIPE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Turn `name`, `pipe\name` or `\\.\pipe\name` into `\\.\pipe\name`.
pub fn normalize_pipe_name(name: &str) -> String {
    if name.starts_with(PIPE_PREFIX) {
        return name.to_string();
    }
    if let Some(rest) = name.strip_prefix(r"pipe\") {
        return format!("{PIPE_PREFIX}{rest}");
    }
    format!("{PIPE_PREFIX}{}", name.trim_start_matches(['\\', '/']))
}

pub struct NamedPipeTransport {
    name: String,
    lifecycle: Lifecycle,
}

impl NamedPipeTransport {
    /// Fails with [`TransportError::Unsupported`] anywhere but Windows.
    pub fn new(name: &str) -> Result<Self, TransportError> {
        if cfg!(not(windows)) {
            return Err(TransportError::unsupported(
                Protocol::NamedPipe,
                "named pipes are only available on Windows",
            ));
        }
        Ok(Self {
            name: normalize_pipe_name(name),
            lifecycle: Lifecycle::new(Protocol::NamedPipe),
        })
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.set_shutdown_timeout(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(windows)]
mod imp {
    use std::io;

    use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

    use super::PIPE_WRITE_TIMEOUT;
    use crate::connection::Protocol;
    use crate::error::TransportError;
    use crate::lifecycle::StreamListener;
    use crate::worker::Accepted;

    pub(super) struct PipeAcceptor {
        name: String,
        pending: NamedPipeServer,
        accepted: u64,
    }

    impl PipeAcceptor {
        pub(super) fn bind(name: &str) -> Result<Self, TransportError> {
            let pending = ServerOptions::new()
                .first_pipe_instance(true)
                .create(name)
                .map_err(|source| TransportError::Bind {
                    addr: name.to_string(),
                    source,
                })?;
            Ok(Self {
                name: name.to_string(),
                pending,
                accepted: 0,
            })
        }
    }

    impl StreamListener for PipeAcceptor {
        async fn accept(&mut self) -> io::Result<Accepted> {
            // Dropping this future (on shutdown) abandons the pending connect.
            if let Err(e) = self.pending.connect().await {
                // The instance is unusable after a failed connect (e.g. the
                // client already hung up), so the next accept needs a new one.
                self.pending = ServerOptions::new().create(&self.name)?;
                return Err(e);
            }
            let next = ServerOptions::new().create(&self.name)?;
            let connected = std::mem::replace(&mut self.pending, next);
            self.accepted += 1;
            Ok(Accepted::from_stream(
                Protocol::NamedPipe,
                format!("{}#{}", self.name, self.accepted),
                connected,
                Some(PIPE_WRITE_TIMEOUT),
            ))
        }

        fn local_addr(&self) -> String {
            self.name.clone()
        }
    }
}

#[async_trait]
impl Transport for NamedPipeTransport {
    fn protocol(&self) -> Protocol {
        Protocol::NamedPipe
    }

    #[cfg(windows)]
    async fn start(&self, ctx: Arc<ServerContext>) -> Result<(), TransportError> {
        let name = self.name.clone();
        self.lifecycle
            .start(ctx, || async move { imp::PipeAcceptor::bind(&name) })
            .await
    }

    #[cfg(not(windows))]
    async fn start(&self, _ctx: Arc<ServerContext>) -> Result<(), TransportError> {
        Err(TransportError::unsupported(
            Protocol::NamedPipe,
            "named pipes are only available on Windows",
        ))
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
