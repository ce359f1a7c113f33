//! Reader/writer adapters handed to handlers.
//!
//! Every connection gets one [`ConnReader`] and one [`ConnWriter`] sharing a
//! close signal. Closing either side closes the connection: pending reads and
//! writes return [`closed_error`] immediately, which is how `Stop` unblocks a
//! handler parked on a silent peer without waiting for it.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::closed_error;

/// Upper bound on the best-effort flush/shutdown done by `close`.
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_millis(250);

/// Byte-stream read side of a connection.
#[async_trait]
pub trait ConnReader: Send + Sync {
    /// Read into `buf`, returning the number of bytes read. `Ok(0)` means the
    /// peer finished the stream.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> io::Result<()>;

    fn is_closed(&self) -> bool;
}

/// Byte-stream write side of a connection. One `write` call is delivered as
/// a unit: concurrent writers never interleave inside a buffer, and a write
/// that fails or is abandoned part way closes the connection.
#[async_trait]
pub trait ConnWriter: Send + Sync {
    async fn write(&self, buf: &[u8]) -> io::Result<()>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> io::Result<()>;

    fn is_closed(&self) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream adapters (TCP, Unix, named pipe, in-memory)
// ─────────────────────────────────────────────────────────────────────────────

/// [`ConnReader`] over any `AsyncRead`.
pub struct StreamReader<R> {
    inner: Mutex<R>,
    closed: CancellationToken,
}

impl<R> StreamReader<R> {
    pub fn new(inner: R, closed: CancellationToken) -> Self {
        Self {
            inner: Mutex::new(inner),
            closed,
        }
    }
}

#[async_trait]
impl<R> ConnReader for StreamReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        let mut inner = tokio::select! {
            _ = self.closed.cancelled() => return Err(closed_error()),
            guard = self.inner.lock() => guard,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            res = inner.read(buf) => res,
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

/// [`ConnWriter`] over any `AsyncWrite`, with an optional per-write deadline.
pub struct StreamWriter<W> {
    inner: Mutex<W>,
    closed: CancellationToken,
    shut: AtomicBool,
    write_timeout: Option<Duration>,
}

impl<W> StreamWriter<W> {
    pub fn new(inner: W, closed: CancellationToken) -> Self {
        Self {
            inner: Mutex::new(inner),
            closed,
            shut: AtomicBool::new(false),
            write_timeout: None,
        }
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}

#[async_trait]
impl<W> ConnWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write(&self, buf: &[u8]) -> io::Result<()> {
        if self.closed.is_cancelled() {
            return Err(closed_error());
        }
        let mut inner = tokio::select! {
            _ = self.closed.cancelled() => return Err(closed_error()),
            guard = self.inner.lock() => guard,
        };
        // Only a completed write leaves the connection open.
        let poison = self.closed.clone().drop_guard();
        let write = async {
            inner.write_all(buf).await?;
            inner.flush().await
        };
        let bounded = async {
            match self.write_timeout {
                Some(limit) => tokio::time::timeout(limit, write)
                    .await
                    .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"))),
                None => write.await,
            }
        };
        let res = tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            res = bounded => res,
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
        // A writer mid-flight is already aborting on the signal; the socket is
        // released when the last handle drops.
        let Ok(mut inner) = self.inner.try_lock() else {
            return Ok(());
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, inner.shutdown()).await {
            Ok(res) => res,
            Err(_) => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Split a bidirectional stream into a reader/writer pair sharing one close
/// signal.
pub fn split_stream<S>(
    stream: S,
    write_timeout: Option<Duration>,
) -> (Arc<dyn ConnReader>, Arc<dyn ConnWriter>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let closed = CancellationToken::new();
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = StreamReader::new(read_half, closed.clone());
    let writer = StreamWriter::new(write_half, closed).with_write_timeout(write_timeout);
    (Arc::new(reader), Arc::new(writer))
}
