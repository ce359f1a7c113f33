//! Chat handler — JOIN / LEAVE / POST / GET over newline-delimited JSON.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use polyport_protocol::{
    ChatMessage, HandlerResult, Method, PostParams, ProtocolError, Request, Response, RoomParams,
};
use polyport_transport::{
    ConnReader, ConnWriter, ConnectionRegistry, Frame, FrameReader, Handler, MAX_FRAME_LEN,
    RequestContext, is_expected_disconnect, write_json,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::state::{ActiveSet, MessageLog};

/// Default bound on delivering one broadcast to one recipient.
pub const BROADCAST_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Ids dropped from the active set because they could not be reached.
    pub evicted: Vec<String>,
}

enum Delivery {
    Sent,
    Missing,
    Failed(io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// ChatHandler
// ─────────────────────────────────────────────────────────────────────────────

pub struct ChatHandler {
    log: MessageLog,
    active: ActiveSet,
    rooms: bool,
    broadcast_timeout: Duration,
}

impl Default for ChatHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatHandler {
    /// Room-aware chat.
    pub fn new() -> Self {
        Self {
            log: MessageLog::new(),
            active: ActiveSet::new(),
            rooms: true,
            broadcast_timeout: BROADCAST_WRITE_TIMEOUT,
        }
    }

    /// One global room: `room` fields are accepted and ignored.
    pub fn single_room() -> Self {
        Self {
            rooms: false,
            ..Self::new()
        }
    }

    pub fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }

    pub fn rooms_enabled(&self) -> bool {
        self.rooms
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn active(&self) -> &ActiveSet {
        &self.active
    }

    /// Apply one request for `conn_id`. Returns the response for the sender
    /// and, for a successful POST, the message to broadcast.
    pub fn dispatch(&self, conn_id: &str, request: &Request) -> (Response, Option<ChatMessage>) {
        let mut posted = None;
        let result = self.apply(conn_id, request, &mut posted);
        (Response::from(result), posted)
    }

    fn apply(
        &self,
        conn_id: &str,
        request: &Request,
        posted: &mut Option<ChatMessage>,
    ) -> HandlerResult {
        let method: Method = request.method.parse()?;
        match method {
            Method::Join => {
                let params: RoomParams = parse_data(&request.data)?;
                let room = self.room(params.room());
                if self.active.join(conn_id, room) {
                    debug!(conn_id, room, "joined");
                }
                Ok(Some(json!({ "room": room })))
            }

            Method::Leave => {
                if self.active.leave(conn_id) {
                    debug!(conn_id, "left");
                }
                Ok(None)
            }

            Method::Post => {
                let params: PostParams = parse_data(&request.data)?;
                let (user, text) = params.require()?;
                let message = self.log.append(user, text, self.room(params.room()));
                let data = serde_json::to_value(&message)
                    .map_err(|e| ProtocolError::internal(format!("Failed to encode message: {e}")))?;
                *posted = Some(message);
                Ok(Some(data))
            }

            Method::Get => {
                let params: RoomParams = parse_data(&request.data)?;
                let messages = self.log.snapshot(self.room(params.room()));
                let data = serde_json::to_value(&messages)
                    .map_err(|e| ProtocolError::internal(format!("Failed to encode messages: {e}")))?;
                Ok(Some(data))
            }
        }
    }

    fn room<'a>(&self, room: Option<&'a str>) -> Option<&'a str> {
        if self.rooms { room } else { None }
    }

    /// Deliver `message` to every joined connection that should see it,
    /// except the sender.
    ///
    /// Writers are looked up in the registry after the recipient snapshot is
    /// taken; no lock is held while writing. A recipient that is gone from
    /// the registry or whose write fails is evicted from the active set, and
    /// a recipient whose write failed or timed out is also disconnected: a
    /// partly written frame must not be followed by anything else. One slow
    /// or dead recipient never prevents delivery to the others.
    pub async fn broadcast(
        &self,
        registry: &ConnectionRegistry,
        sender_id: &str,
        message: &ChatMessage,
    ) -> BroadcastReport {
        let recipients = self.active.recipients(sender_id, message.room.as_deref());
        if recipients.is_empty() {
            return BroadcastReport::default();
        }

        let mut payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode broadcast message {}: {e}", message.id);
                return BroadcastReport::default();
            }
        };
        payload.push(b'\n');
        let payload = payload.as_slice();

        let limit = self.broadcast_timeout;
        let outcomes = join_all(recipients.into_iter().map(|id| async move {
            let Some(record) = registry.get_connection(&id) else {
                return (id, Delivery::Missing);
            };
            let delivery = match tokio::time::timeout(limit, record.writer.write(payload)).await {
                Ok(Ok(())) => Delivery::Sent,
                Ok(Err(e)) => Delivery::Failed(e),
                Err(_) => Delivery::Failed(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "broadcast write timed out",
                )),
            };
            if matches!(delivery, Delivery::Failed(_)) {
                if let Err(e) = record.close().await {
                    debug!(conn_id = %id, "close after failed broadcast: {e}");
                }
            }
            (id, delivery)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, delivery) in outcomes {
            match delivery {
                Delivery::Sent => {
                    report.delivered += 1;
                    continue;
                }
                Delivery::Missing => debug!(conn_id = %id, "broadcast recipient no longer connected"),
                Delivery::Failed(e) if is_expected_disconnect(&e) => {
                    debug!(conn_id = %id, "broadcast recipient disconnected: {e}")
                }
                Delivery::Failed(e) => warn!(conn_id = %id, "broadcast write failed: {e}"),
            }
            self.active.leave(&id);
            report.evicted.push(id);
        }
        report
    }

    async fn serve(
        &self,
        ctx: &RequestContext,
        reader: Arc<dyn ConnReader>,
        writer: &dyn ConnWriter,
    ) -> anyhow::Result<()> {
        let conn_id = ctx.conn.id.as_str();
        let mut frames = FrameReader::new(reader);

        while let Some(frame) = frames.next_frame().await? {
            let line = match frame {
                Frame::Line(line) => line,
                Frame::Oversized(len) => {
                    debug!(conn_id, len, "oversized request dropped");
                    let err = ProtocolError::payload_too_large(MAX_FRAME_LEN);
                    write_json(writer, &Response::error(&err)).await?;
                    continue;
                }
            };

            let request: Request = match serde_json::from_slice(&line) {
                Ok(request) => request,
                Err(e) => {
                    let err = ProtocolError::bad_request(format!("Invalid request: {e}"));
                    write_json(writer, &Response::error(&err)).await?;
                    continue;
                }
            };

            let (response, posted) = self.dispatch(conn_id, &request);
            write_json(writer, &response).await?;

            if let Some(message) = posted {
                let report = self.broadcast(&ctx.connections, conn_id, &message).await;
                debug!(
                    conn_id,
                    message_id = message.id,
                    delivered = report.delivered,
                    evicted = report.evicted.len(),
                    "broadcast"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for ChatHandler {
    async fn handle(
        &self,
        ctx: RequestContext,
        reader: Arc<dyn ConnReader>,
        writer: Arc<dyn ConnWriter>,
    ) -> anyhow::Result<()> {
        let result = self.serve(&ctx, reader, writer.as_ref()).await;
        self.active.leave(&ctx.conn.id);
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_data<T: DeserializeOwned + Default>(data: &Value) -> Result<T, ProtocolError> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data.clone()).map_err(|e| ProtocolError::bad_request(format!("Invalid data: {e}")))
}
