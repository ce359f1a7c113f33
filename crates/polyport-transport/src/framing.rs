//! Newline-delimited framing on top of [`ConnReader`] / [`ConnWriter`].
//!
//! One frame per line. The writer side always terminates a frame with `\n`
//! so line-oriented peers can resynchronise after a bad line.

use std::io;
use std::sync::Arc;

use serde::Serialize;

use crate::io::{ConnReader, ConnWriter};

/// Largest accepted frame, excluding the terminator.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// A unit produced by [`FrameReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One line, terminator and trailing `\r` stripped.
    Line(Vec<u8>),
    /// A line longer than the limit. Its bytes were discarded.
    Oversized(usize),
}

/// Splits a connection's byte stream into lines.
pub struct FrameReader {
    reader: Arc<dyn ConnReader>,
    buf: Vec<u8>,
    // Prefix of `buf` already searched for a newline.
    scanned: usize,
    chunk: Vec<u8>,
    max_len: usize,
    // Bytes dropped so far from an oversized line still being read.
    discarding: Option<usize>,
}

impl FrameReader {
    pub fn new(reader: Arc<dyn ConnReader>) -> Self {
        Self::with_max_len(reader, MAX_FRAME_LEN)
    }

    pub fn with_max_len(reader: Arc<dyn ConnReader>, max_len: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            scanned: 0,
            chunk: vec![0; READ_CHUNK],
            max_len,
            discarding: None,
        }
    }

    /// Next non-blank frame, or `None` once the peer ends the stream.
    ///
    /// An unterminated tail at end of stream counts as a final frame.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        loop {
            let found = self.buf[self.scanned..].iter().position(|&b| b == b'\n');
            if let Some(pos) = found.map(|i| i + self.scanned) {
                self.scanned = 0;
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if let Some(dropped) = self.discarding.take() {
                    return Ok(Some(Frame::Oversized(dropped + line.len())));
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.len() > self.max_len {
                    return Ok(Some(Frame::Oversized(line.len())));
                }
                if is_blank(&line) {
                    continue;
                }
                return Ok(Some(Frame::Line(line)));
            }

            if self.buf.len() > self.max_len {
                let dropped = self.discarding.unwrap_or(0) + self.buf.len();
                self.discarding = Some(dropped);
                self.buf.clear();
            }
            self.scanned = self.buf.len();

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                return Ok(self.finish());
            }
            self.buf.extend_from_slice(&self.chunk[..n]);
        }
    }

    fn finish(&mut self) -> Option<Frame> {
        self.scanned = 0;
        let mut tail = std::mem::take(&mut self.buf);
        if let Some(dropped) = self.discarding.take() {
            return Some(Frame::Oversized(dropped + tail.len()));
        }
        if tail.last() == Some(&b'\r') {
            tail.pop();
        }
        if is_blank(&tail) {
            return None;
        }
        if tail.len() > self.max_len {
            return Some(Frame::Oversized(tail.len()));
        }
        Some(Frame::Line(tail))
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Write `payload` as one frame, appending `\n` if it is missing.
pub async fn write_frame(writer: &dyn ConnWriter, payload: &[u8]) -> io::Result<()> {
    if payload.ends_with(b"\n") {
        return writer.write(payload).await;
    }
    let mut framed = Vec::with_capacity(payload.len() + 1);
    framed.extend_from_slice(payload);
    framed.push(b'\n');
    writer.write(&framed).await
}

/// Serialize `value` as one JSON line.
pub async fn write_json<T: Serialize + ?Sized>(writer: &dyn ConnWriter, value: &T) -> io::Result<()> {
    let mut framed = serde_json::to_vec(value).map_err(io::Error::other)?;
    framed.push(b'\n');
    writer.write(&framed).await
}
