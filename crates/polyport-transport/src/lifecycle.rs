//! Start/stop state machine and the generic accept loop.
//!
//! Every transport goes `Idle -> Starting -> Running -> Stopping -> Idle`.
//! `Starting` exists so two concurrent `start` calls cannot both bind, and a
//! `stop` that arrives during it waits for the start to settle.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::connection::Protocol;
use crate::context::ServerContext;
use crate::error::TransportError;
use crate::worker::{Accepted, serve_connection};

/// How long `stop` waits for workers before giving up on them.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept, so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A bound listening resource that yields connections one at a time.
pub(crate) trait StreamListener: Send + 'static {
    fn accept(&mut self) -> impl Future<Output = io::Result<Accepted>> + Send;

    fn local_addr(&self) -> String;
}

/// Handles owned by a running transport.
pub(crate) struct Running {
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub ctx: Arc<ServerContext>,
    pub local_addr: String,
}

enum State {
    Idle,
    Starting,
    Running(Running),
    Stopping,
}

pub(crate) struct Lifecycle {
    protocol: Protocol,
    state: Mutex<State>,
    shutdown_timeout: Duration,
    local_addr: Mutex<Option<String>>,
    // Signalled whenever `Starting` resolves to `Running` or back to `Idle`.
    settled: Notify,
}

impl Lifecycle {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            state: Mutex::new(State::Idle),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            local_addr: Mutex::new(None),
            settled: Notify::new(),
        }
    }

    pub fn set_shutdown_timeout(&mut self, timeout: Duration) {
        self.shutdown_timeout = timeout;
    }

    /// Claim the right to start. Fails unless the transport is idle.
    pub fn reserve(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        match *state {
            State::Idle => {
                *state = State::Starting;
                Ok(())
            }
            _ => Err(TransportError::AlreadyRunning(self.protocol)),
        }
    }

    /// Give back a reservation after a failed bind.
    pub fn abort_start(&self) {
        *self.state.lock() = State::Idle;
        self.settled.notify_waiters();
    }

    pub fn commit(&self, running: Running) {
        *self.local_addr.lock() = Some(running.local_addr.clone());
        *self.state.lock() = State::Running(running);
        self.settled.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), State::Running(_))
    }

    pub fn local_addr(&self) -> Option<String> {
        if self.is_running() {
            self.local_addr.lock().clone()
        } else {
            None
        }
    }

    /// Bind with `bind`, then run the accept loop on a tracked task.
    pub async fn start<L, F, Fut>(&self, ctx: Arc<ServerContext>, bind: F) -> Result<(), TransportError>
    where
        L: StreamListener,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<L, TransportError>>,
    {
        self.reserve()?;
        let listener = match bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.abort_start();
                return Err(e);
            }
        };

        let local_addr = listener.local_addr();
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(run_accept_loop(
            listener,
            self.protocol,
            ctx.clone(),
            shutdown.clone(),
            tracker.clone(),
        ));

        info!("{} transport listening on {local_addr}", self.protocol);
        self.commit(Running {
            shutdown,
            tracker,
            ctx,
            local_addr,
        });
        Ok(())
    }

    /// Stop a running transport. A no-op when idle. If a `start` is in
    /// progress, waits for it and then stops what it started.
    ///
    /// Cancels the accept loop and every worker, closes every connection in
    /// the shared registry, then waits up to the shutdown timeout for the
    /// workers to unwind.
    pub async fn stop(&self) -> Result<(), TransportError> {
        let running = loop {
            let settled = self.settled.notified();
            {
                let mut state = self.state.lock();
                match std::mem::replace(&mut *state, State::Stopping) {
                    State::Running(running) => break running,
                    State::Starting => *state = State::Starting,
                    other => {
                        *state = other;
                        return Ok(());
                    }
                }
            }
            debug!("{} transport is starting; stop waits for it", self.protocol);
            settled.await;
        };

        info!("Stopping {} transport", self.protocol);
        running.shutdown.cancel();
        let closed = running.ctx.connections().close_all_connections().await;

        running.tracker.close();
        if tokio::time::timeout(self.shutdown_timeout, running.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "{} transport: {} worker(s) still running after {:?}",
                self.protocol,
                running.tracker.len(),
                self.shutdown_timeout
            );
        }

        *self.local_addr.lock() = None;
        *self.state.lock() = State::Idle;
        info!("{} transport stopped", self.protocol);
        closed.map_err(TransportError::from)
    }
}

async fn run_accept_loop<L: StreamListener>(
    mut listener: L,
    protocol: Protocol,
    ctx: Arc<ServerContext>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            res = listener.accept() => res,
        };

        match accepted {
            Ok(accepted) => {
                tracker.spawn(serve_connection(ctx.clone(), accepted, shutdown.clone()));
            }
            Err(_) if shutdown.is_cancelled() => break,
            Err(e) => {
                warn!(%protocol, "accept failed: {e}");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
    debug!(%protocol, "accept loop exited");
}
