//! One live chat connection: its queue handle and the two pumps that move
//! frames between the WebSocket and the hub.
//!
//! The outbound queue is a bounded mpsc channel. Anyone holding a
//! [`ClientHandle`] may produce into it; only the write pump consumes. Closing
//! the queue is signalled with a cancellation token, since producers other
//! than the hub also hold senders.

use std::fmt::Display;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::ChatContext;
use crate::config::ChatConfig;
use crate::models::{ClientFrame, UserId};

/// The authenticated party behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

/// Producer side of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    conn_id: Uuid,
    identity: Identity,
    sender: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl ClientHandle {
    pub fn new(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            conn_id: Uuid::new_v4(),
            identity,
            sender,
            closed: CancellationToken::new(),
        };
        (handle, receiver)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    /// Whether both handles belong to the same physical connection.
    pub fn is_same(&self, other: &ClientHandle) -> bool {
        self.conn_id == other.conn_id
    }

    /// Queue a frame without waiting.
    pub fn try_enqueue(&self, payload: String) -> Result<(), EnqueueError> {
        if self.closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        self.sender.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Queue a frame, waiting for room unless the queue gets closed first.
    pub async fn enqueue(&self, payload: String) -> Result<(), EnqueueError> {
        if self.closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        tokio::select! {
            res = self.sender.send(payload) => res.map_err(|_| EnqueueError::Closed),
            _ = self.closed.cancelled() => Err(EnqueueError::Closed),
        }
    }

    /// Close the queue. The write pump sends a close frame and stops.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Drain the outbound queue onto the transport and keep the peer alive with
/// periodic pings. Returns when the queue is closed or a write fails.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<String>,
    closed: CancellationToken,
    config: &ChatConfig,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);

    loop {
        tokio::select! {
            biased;

            _ = closed.cancelled() => {
                // Frames accepted before the close still go out ahead of it.
                rx.close();
                if let Ok(first) = rx.try_recv() {
                    match timeout(config.write_wait, write_batch(&mut sink, &mut rx, first)).await {
                        Ok(Ok(count)) => trace!(count, "Flushed remaining frames before close"),
                        Ok(Err(e)) => debug!("Final write failed: {e}"),
                        Err(_) => warn!("Write deadline exceeded while draining"),
                    }
                }
                let _ = timeout(config.write_wait, sink.send(Message::Close(None))).await;
                break;
            }
            next = rx.recv() => {
                let Some(first) = next else {
                    let _ = timeout(config.write_wait, sink.send(Message::Close(None))).await;
                    break;
                };
                match timeout(config.write_wait, write_batch(&mut sink, &mut rx, first)).await {
                    Ok(Ok(count)) => trace!(count, "Flushed outbound frames"),
                    Ok(Err(e)) => {
                        debug!("Write failed: {e}");
                        break;
                    }
                    Err(_) => {
                        warn!("Write deadline exceeded");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                match timeout(config.write_wait, sink.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => trace!("Ping sent"),
                    Ok(Err(e)) => {
                        debug!("Ping failed: {e}");
                        break;
                    }
                    Err(_) => {
                        warn!("Ping write deadline exceeded");
                        break;
                    }
                }
            }
        }
    }

    // Let the read side know this connection is finished.
    closed.cancel();
}

/// Feed `first` and everything already queued behind it, then flush once.
async fn write_batch<S>(
    sink: &mut S,
    rx: &mut mpsc::Receiver<String>,
    first: String,
) -> Result<usize, S::Error>
where
    S: Sink<Message> + Unpin,
{
    sink.feed(Message::Text(first.into())).await?;
    let pending = rx.len();
    let mut written = 1;
    for _ in 0..pending {
        let Ok(next) = rx.try_recv() else { break };
        sink.feed(Message::Text(next.into())).await?;
        written += 1;
    }
    sink.flush().await?;
    Ok(written)
}

/// Read frames until the transport closes, errors, goes quiet past the read
/// deadline, or the queue is closed from elsewhere.
pub(crate) async fn read_pump<R, E>(mut stream: R, client: &ClientHandle, ctx: &ChatContext)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let config = &ctx.config;
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let msg = tokio::select! {
            _ = client.closed.cancelled() => break,
            next = timeout_at(deadline, stream.next()) => match next {
                Err(_) => {
                    info!(user_id = client.user_id(), "Read deadline exceeded");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!(user_id = client.user_id(), "Read failed: {e}");
                    break;
                }
                Ok(Some(Ok(msg))) => msg,
            },
        };

        match msg {
            Message::Pong(_) => {
                deadline = Instant::now() + config.pong_wait;
            }
            Message::Text(text) => {
                if !handle_frame(text.as_str().as_bytes(), client, ctx).await {
                    break;
                }
            }
            Message::Binary(data) => {
                if !handle_frame(&data, client, ctx).await {
                    break;
                }
            }
            Message::Ping(_) => {}
            Message::Close(_) => break,
        }
    }
}

/// Returns false when the frame is fatal to the connection.
async fn handle_frame(data: &[u8], client: &ClientHandle, ctx: &ChatContext) -> bool {
    if data.len() > ctx.config.max_message_bytes {
        warn!(
            user_id = client.user_id(),
            size = data.len(),
            limit = ctx.config.max_message_bytes,
            "Inbound frame too large"
        );
        return false;
    }
    ctx.metrics.frame_received();

    let frame: ClientFrame = match serde_json::from_slice(data) {
        Ok(frame) => frame,
        Err(e) => {
            ctx.metrics.decode_error();
            warn!(user_id = client.user_id(), "Ignoring malformed chat frame: {e}");
            return true;
        }
    };

    match ctx.router.route(client.identity(), frame).await {
        Ok(delivered) => {
            if let Err(e) = client.enqueue(delivered.payload).await {
                debug!(user_id = client.user_id(), "Echo dropped: {e}");
            }
        }
        Err(e) => warn!(user_id = client.user_id(), "Message not delivered: {e}"),
    }
    true
}

/// Drive one upgraded WebSocket until it ends.
pub async fn serve_connection(socket: WebSocket, identity: Identity, ctx: ChatContext) {
    let (sink, stream) = socket.split();
    run_connection(sink, stream, identity, ctx).await;
}

pub(crate) async fn run_connection<S, R, E>(sink: S, stream: R, identity: Identity, ctx: ChatContext)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (client, rx) = ClientHandle::new(identity, ctx.config.send_queue_capacity);
    info!(
        user_id = identity.user_id,
        admin = identity.is_admin,
        conn_id = %client.conn_id(),
        "Chat connection opened"
    );
    ctx.metrics.connection_opened();
    ctx.hub.register(client.clone()).await;

    let closed = client.closed_token();
    let config = ctx.config.clone();
    let writer = tokio::spawn(async move {
        write_pump(sink, rx, closed, &config).await;
    });

    read_pump(stream, &client, &ctx).await;

    ctx.hub.unregister(client.clone()).await;
    client.close();
    if let Err(e) = writer.await {
        warn!("Write pump task failed: {e}");
    }
    ctx.metrics.connection_closed();
    info!(
        user_id = identity.user_id,
        conn_id = %client.conn_id(),
        "Chat connection closed"
    );
}
