//! Unix domain socket transport.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::connection::Protocol;
use crate::context::ServerContext;
use crate::error::TransportError;
use crate::lifecycle::Lifecycle;
use crate::transport::Transport;

pub struct UnixTransport {
    path: PathBuf,
    lifecycle: Lifecycle,
}

impl UnixTransport {
    /// Fails with [`TransportError::Unsupported`] on platforms without Unix
    /// domain sockets.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, TransportError> {
        if cfg!(not(unix)) {
            return Err(TransportError::unsupported(
                Protocol::Unix,
                "unix domain sockets are not available",
            ));
        }
        Ok(Self {
            path: path.into(),
            lifecycle: Lifecycle::new(Protocol::Unix),
        })
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.set_shutdown_timeout(timeout);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
mod imp {
    use std::io;
    use std::path::{Path, PathBuf};

    use tokio::net::UnixListener;
    use tracing::{debug, warn};

    use crate::connection::Protocol;
    use crate::error::TransportError;
    use crate::lifecycle::StreamListener;
    use crate::worker::Accepted;

    /// Owns the socket file: it is removed when the accept loop drops this.
    pub(super) struct UnixAcceptor {
        listener: UnixListener,
        path: PathBuf,
    }

    impl UnixAcceptor {
        pub(super) fn bind(path: &Path) -> Result<Self, TransportError> {
            remove_stale_socket(path);
            let listener = UnixListener::bind(path).map_err(|source| TransportError::Bind {
                addr: path.display().to_string(),
                source,
            })?;
            Ok(Self {
                listener,
                path: path.to_path_buf(),
            })
        }
    }

    impl StreamListener for UnixAcceptor {
        async fn accept(&mut self) -> io::Result<Accepted> {
            let (stream, peer) = self.listener.accept().await?;
            let remote = peer
                .as_pathname()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("unix:{}", self.path.display()));
            Ok(Accepted::from_stream(Protocol::Unix, remote, stream, None))
        }

        fn local_addr(&self) -> String {
            self.path.display().to_string()
        }
    }

    impl Drop for UnixAcceptor {
        fn drop(&mut self) {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!("removed socket file {}", self.path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove socket file {}: {e}", self.path.display()),
            }
        }
    }

    /// A socket file left behind by a crashed process makes `bind` fail with
    /// "address in use". Only socket files are removed.
    fn remove_stale_socket(path: &Path) {
        use std::os::unix::fs::FileTypeExt;

        let Ok(meta) = std::fs::symlink_metadata(path) else {
            return;
        };
        if meta.file_type().is_socket() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("failed to remove stale socket {}: {e}", path.display());
            } else {
                debug!("removed stale socket {}", path.display());
            }
        }
    }
}

#[async_trait]
impl Transport for UnixTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Unix
    }

    #[cfg(unix)]
    async fn start(&self, ctx: Arc<ServerContext>) -> Result<(), TransportError> {
        let path = self.path.clone();
        self.lifecycle
            .start(ctx, || async move { imp::UnixAcceptor::bind(&path) })
            .await
    }

    #[cfg(not(unix))]
    async fn start(&self, _ctx: Arc<ServerContext>) -> Result<(), TransportError> {
        Err(TransportError::unsupported(
            Protocol::Unix,
            "unix domain sockets are not available",
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
