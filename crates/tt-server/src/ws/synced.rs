//! Write-serialized WebSocket connection
//!
//! Several tasks write to the same socket (output pumps, keepalive, hub
//! replies); the sink sits behind a mutex held for exactly one frame. Reads
//! are single-consumer and enforce a liveness deadline that every pong
//! extends.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::frame::{Frame, FrameSink, FrameStream};
use super::ConnectionError;

/// Upper bound on flushing the close handshake
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Control frame payload limit minus the two-byte close code
const MAX_CLOSE_REASON: usize = 123;

type PongHandler = Box<dyn Fn() + Send + Sync>;

/// A WebSocket connection safe for concurrent writers
pub struct SyncedConnection {
    sink: AsyncMutex<FrameSink>,
    stream: AsyncMutex<FrameStream>,
    closed: CancellationToken,
    read_deadline: Mutex<Option<Instant>>,
    pong_handler: Mutex<Option<PongHandler>>,
}

impl SyncedConnection {
    /// Wrap a pair of frame halves
    pub fn new(sink: FrameSink, stream: FrameStream) -> Arc<Self> {
        Arc::new(Self {
            sink: AsyncMutex::new(sink),
            stream: AsyncMutex::new(stream),
            closed: CancellationToken::new(),
            read_deadline: Mutex::new(None),
            pong_handler: Mutex::new(None),
        })
    }

    /// Write one frame
    ///
    /// Fails with [`ConnectionError::Closed`] once the connection is closed,
    /// including while waiting for another writer to finish.
    pub async fn write_frame(&self, frame: Frame) -> Result<(), ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(ConnectionError::Closed),
            result = async {
                let mut sink = self.sink.lock().await;
                sink.send(frame).await
            } => result,
        }
    }

    /// Write a text frame
    pub async fn write_text(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.write_frame(Frame::Text(text.into())).await
    }

    /// Serialize `value` as JSON and write it as a text frame
    pub async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ConnectionError> {
        let text =
            serde_json::to_string(value).map_err(|e| ConnectionError::Encode(e.to_string()))?;
        self.write_text(text).await
    }

    /// Write a close frame; the connection stays usable until [`close`](Self::close)
    ///
    /// Reasons longer than a control frame allows are truncated.
    pub async fn write_close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        let mut end = reason.len().min(MAX_CLOSE_REASON);
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        self.write_frame(Frame::Close(Some((code, reason[..end].to_string()))))
            .await
    }

    /// Read the next text frame and decode it as JSON
    ///
    /// Only one task may read. Ping frames are skipped, pong frames run the
    /// pong handler. A binary frame, a close frame, an undecodable payload or
    /// an expired read deadline is an error.
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, ConnectionError> {
        let mut stream = self.stream.lock().await;

        loop {
            let deadline = *self.read_deadline.lock();

            let next = tokio::select! {
                _ = self.closed.cancelled() => return Err(ConnectionError::Closed),
                next = async {
                    match deadline {
                        Some(at) => tokio::time::timeout_at(at, stream.next()).await.ok(),
                        None => Some(stream.next().await),
                    }
                } => next,
            };

            let frame = match next {
                Some(Some(frame)) => frame?,
                Some(None) => return Err(ConnectionError::Closed),
                None => {
                    // The deadline may have been pushed back while we waited
                    match *self.read_deadline.lock() {
                        Some(at) if at > Instant::now() => continue,
                        None => continue,
                        Some(_) => return Err(ConnectionError::TimedOut),
                    }
                }
            };

            match frame {
                Frame::Text(text) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| ConnectionError::Protocol(e.to_string()));
                }
                Frame::Binary(data) => {
                    return Err(ConnectionError::Protocol(format!(
                        "unexpected binary frame ({} bytes)",
                        data.len()
                    )));
                }
                Frame::Ping(_) => continue,
                Frame::Pong(_) => {
                    if let Some(handler) = self.pong_handler.lock().as_ref() {
                        handler();
                    }
                }
                Frame::Close(close) => {
                    tracing::debug!("Peer closed connection: {:?}", close);
                    return Err(ConnectionError::Closed);
                }
            }
        }
    }

    /// Set or clear the read deadline
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        *self.read_deadline.lock() = deadline;
    }

    /// Install the callback run for every received pong
    pub fn set_pong_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.pong_handler.lock() = Some(Box::new(handler));
    }

    /// Ping every `interval` and require a pong at least every `deadline`
    ///
    /// The pinger stops when the connection closes or a ping cannot be sent.
    pub fn start_keepalive(self: &Arc<Self>, interval: Duration, deadline: Duration) -> JoinHandle<()> {
        self.set_read_deadline(Some(Instant::now() + deadline));

        let weak: Weak<Self> = Arc::downgrade(self);
        self.set_pong_handler(move || {
            if let Some(conn) = weak.upgrade() {
                conn.set_read_deadline(Some(Instant::now() + deadline));
            }
        });

        let conn = Arc::downgrade(self);
        let closed = self.closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let Some(conn) = conn.upgrade() else { break };
                if let Err(e) = conn.write_frame(Frame::Ping(Vec::new())).await {
                    tracing::debug!("Keepalive stopped: {}", e);
                    break;
                }
            }
        })
    }

    /// Close the connection; pending and future reads and writes fail
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        let mut sink = self.sink.lock().await;
        if let Ok(Err(e)) = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sink.close()).await {
            tracing::trace!("Error closing WebSocket sink: {}", e);
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}
