//! WebSocket transport using Axum.
//!
//! "Accept" is an HTTP upgrade on the configured path. Each upgraded socket
//! is adapted to the byte-stream [`ConnReader`] / [`ConnWriter`] pair: every
//! inbound message becomes one newline-terminated line, and every write goes
//! out as one message with the trailing newline removed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use bytes::{Bytes, BytesMut};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::connection::Protocol;
use crate::context::ServerContext;
use crate::error::{TransportError, closed_error};
use crate::io::{CLOSE_TIMEOUT, ConnReader, ConnWriter};
use crate::lifecycle::{Lifecycle, Running};
use crate::transport::Transport;
use crate::worker::{Accepted, serve_connection};

const HEALTH_PATH: &str = "/health";

/// WebSocket listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// `host:port` to bind (port 0 for OS-assigned)
    pub addr: String,
    /// Upgrade path
    pub path: String,
    /// Maximum concurrent connections on this listener; `None` for no limit
    pub max_connections: Option<usize>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".into(),
            path: "/ws".into(),
            max_connections: Some(32),
        }
    }
}

pub struct WebSocketTransport {
    config: WebSocketConfig,
    lifecycle: Lifecycle,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(Protocol::WebSocket),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.set_shutdown_timeout(timeout);
        self
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    async fn bind(&self) -> Result<(TcpListener, String, String), TransportError> {
        let path = upgrade_path(&self.config.path)?;
        let listener = TcpListener::bind(&self.config.addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: self.config.addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?.to_string();
        Ok((listener, local_addr, path))
    }
}

/// Normalise the upgrade path and reject ones the router cannot take.
fn upgrade_path(path: &str) -> Result<String, TransportError> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let invalid = |reason: &str| TransportError::Config {
        protocol: Protocol::WebSocket,
        reason: format!("{reason}: {path}"),
    };
    if path == HEALTH_PATH {
        return Err(invalid("upgrade path collides with the health endpoint"));
    }
    if path.contains(['{', '}', '*']) {
        return Err(invalid("upgrade path must not contain route parameters"));
    }
    Ok(path)
}

struct AppState {
    ctx: Arc<ServerContext>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    max_connections: Option<usize>,
    // Upgrades admitted and not yet finished, counted from admission so
    // concurrent handshakes cannot overshoot the limit.
    open: AtomicUsize,
}

/// One admitted connection's place under `max_connections`, released on drop.
struct ConnectionSlot(Arc<AppState>);

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.max_connections.unwrap_or(usize::MAX);
        state
            .open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        Some(Self(state.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn protocol(&self) -> Protocol {
        Protocol::WebSocket
    }

    async fn start(&self, ctx: Arc<ServerContext>) -> Result<(), TransportError> {
        self.lifecycle.reserve()?;
        let (listener, local_addr, path) = match self.bind().await {
            Ok(bound) => bound,
            Err(e) => {
                self.lifecycle.abort_start();
                return Err(e);
            }
        };

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let state = Arc::new(AppState {
            ctx: ctx.clone(),
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
            max_connections: self.config.max_connections,
            open: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route(&path, get(ws_upgrade_handler))
            .route(HEALTH_PATH, get(health_handler))
            .with_state(state);

        let signal = shutdown.clone().cancelled_owned();
        tracker.spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(signal)
            .await;
            if let Err(e) = served {
                warn!("WebSocket server error: {e}");
            }
        });

        info!("websocket transport listening on ws://{local_addr}{path}");
        self.lifecycle.commit(Running {
            shutdown,
            tracker,
            ctx,
            local_addr,
        });
        Ok(())
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

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.shutdown.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            "Connection rejected: max connections reached ({})",
            state.max_connections.unwrap_or_default()
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let tracker = state.tracker.clone();
    ws.on_upgrade(move |socket| {
        let accepted = accept_socket(socket, peer);
        let worker = serve_connection(state.ctx.clone(), accepted, state.shutdown.clone());
        tracker.track_future(async move {
            worker.await;
            drop(slot);
        })
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "stats": state.ctx.stats(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Message <-> byte stream adapters
// ─────────────────────────────────────────────────────────────────────────────

fn accept_socket(socket: WebSocket, peer: SocketAddr) -> Accepted {
    let closed = CancellationToken::new();
    let (sink, stream) = socket.split();
    Accepted {
        protocol: Protocol::WebSocket,
        remote: peer.to_string(),
        reader: Arc::new(WebSocketReader {
            inner: Mutex::new(ReadState {
                stream,
                pending: BytesMut::new(),
            }),
            closed: closed.clone(),
        }),
        writer: Arc::new(WebSocketWriter {
            sink: Mutex::new(sink),
            closed,
            shut: AtomicBool::new(false),
        }),
    }
}

fn ws_error(e: axum::Error) -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, e)
}

fn push_line(pending: &mut BytesMut, payload: &[u8]) {
    pending.extend_from_slice(payload);
    if !payload.ends_with(b"\n") {
        pending.extend_from_slice(b"\n");
    }
}

struct ReadState {
    stream: SplitStream<WebSocket>,
    // Unread remainder of the current message, newline included.
    pending: BytesMut,
}

pub struct WebSocketReader {
    inner: Mutex<ReadState>,
    closed: CancellationToken,
}

#[async_trait]
impl ConnReader for WebSocketReader {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        let mut state = tokio::select! {
            _ = self.closed.cancelled() => return Err(closed_error()),
            guard = self.inner.lock() => guard,
        };

        loop {
            if !state.pending.is_empty() {
                let n = buf.len().min(state.pending.len());
                let chunk = state.pending.split_to(n);
                buf[..n].copy_from_slice(&chunk);
                return Ok(n);
            }

            let next = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(closed_error()),
                msg = state.stream.next() => msg,
            };
            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(ws_error(e)),
                None => return Ok(0),
            };
            match message {
                Message::Text(text) => push_line(&mut state.pending, text.as_str().as_bytes()),
                Message::Binary(data) => push_line(&mut state.pending, &data),
                Message::Close(_) => return Ok(0),
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.cancel();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

pub struct WebSocketWriter {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: CancellationToken,
    shut: AtomicBool,
}

#[async_trait]
impl ConnWriter for WebSocketWriter {
    async fn write(&self, buf: &[u8]) -> io::Result<()> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        let payload = buf.strip_suffix(b"\n").unwrap_or(buf);
        let message = match std::str::from_utf8(payload) {
            Ok(text) => Message::Text(text.to_owned().into()),
            Err(_) => Message::Binary(Bytes::copy_from_slice(payload)),
        };

        let mut sink = tokio::select! {
            _ = self.closed.cancelled() => return Err(closed_error()),
            guard = self.sink.lock() => guard,
        };
        let poison = self.closed.clone().drop_guard();
        let res = tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            res = sink.send(message) => res.map_err(ws_error),
        };
        if res.is_ok() {
            poison.disarm();
        }
        res
    }

    async fn close(&self) -> io::Result<()> {
        if self.shut.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closed.cancel();
        let Ok(mut sink) = self.sink.try_lock() else {
            return Ok(());
        };
        let goodbye = async {
            sink.send(Message::Close(None)).await?;
            sink.close().await
        };
        if let Ok(Err(e)) = tokio::time::timeout(CLOSE_TIMEOUT, goodbye).await {
            debug!("websocket close handshake failed: {e}");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
