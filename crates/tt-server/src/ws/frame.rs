//! Transport-neutral WebSocket frames
//!
//! The setup socket is served by axum and the mesh socket by
//! tokio-tungstenite. Both are reduced to a boxed `Sink<Frame>` /
//! `Stream<Frame>` pair so the connection and hub code never sees either
//! library's message type.

use std::borrow::Cow;
use std::pin::Pin;

use axum::extract::ws as axum_ws;
use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::ConnectionError;

/// Normal closure close code
pub const CLOSE_NORMAL: u16 = 1000;

/// Going-away close code, used when the server abandons a session
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// One WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
    /// Ping control frame
    Ping(Vec<u8>),
    /// Pong control frame
    Pong(Vec<u8>),
    /// Close frame with optional code and reason
    Close(Option<(u16, String)>),
}

/// Outbound half of a framed connection
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ConnectionError> + Send>>;

/// Inbound half of a framed connection
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ConnectionError>> + Send>>;

/// Split an axum WebSocket into frame halves
pub fn from_axum(socket: axum_ws::WebSocket) -> (FrameSink, FrameStream) {
    let (sink, stream) = socket.split();

    let sink = sink
        .sink_map_err(ConnectionError::transport)
        .with(|frame: Frame| futures::future::ready(Ok::<_, ConnectionError>(to_axum(frame))));

    let stream = stream.map(|msg| {
        msg.map(from_axum_message)
            .map_err(ConnectionError::transport)
    });

    (Box::pin(sink), Box::pin(stream))
}

/// Split a tungstenite WebSocket into frame halves
pub fn from_tungstenite<S>(ws: WebSocketStream<S>) -> (FrameSink, FrameStream)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();

    let sink = sink
        .sink_map_err(ConnectionError::transport)
        .with(|frame: Frame| futures::future::ready(Ok::<_, ConnectionError>(to_tungstenite(frame))));

    let stream = stream.filter_map(|msg| {
        futures::future::ready(match msg {
            // Raw frames only appear when writing; skip them on read
            Ok(Message::Frame(_)) => None,
            Ok(msg) => Some(Ok(from_tungstenite_message(msg))),
            Err(e) => Some(Err(ConnectionError::transport(e))),
        })
    });

    (Box::pin(sink), Box::pin(stream))
}

/// An in-memory connected pair: frames written on one side are read on the other
pub fn duplex() -> ((FrameSink, FrameStream), (FrameSink, FrameStream)) {
    let (a_tx, a_rx) = mpsc::unbounded::<Frame>();
    let (b_tx, b_rx) = mpsc::unbounded::<Frame>();

    (memory_half(a_tx, b_rx), memory_half(b_tx, a_rx))
}

fn memory_half(
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
) -> (FrameSink, FrameStream) {
    let sink = tx.sink_map_err(|_| ConnectionError::Closed);
    let stream = rx.map(Ok::<Frame, ConnectionError>);
    (Box::pin(sink), Box::pin(stream))
}

fn to_axum(frame: Frame) -> axum_ws::Message {
    match frame {
        Frame::Text(text) => axum_ws::Message::Text(text),
        Frame::Binary(data) => axum_ws::Message::Binary(data),
        Frame::Ping(data) => axum_ws::Message::Ping(data),
        Frame::Pong(data) => axum_ws::Message::Pong(data),
        Frame::Close(close) => axum_ws::Message::Close(close.map(|(code, reason)| {
            axum_ws::CloseFrame {
                code,
                reason: Cow::Owned(reason),
            }
        })),
    }
}

fn from_axum_message(msg: axum_ws::Message) -> Frame {
    match msg {
        axum_ws::Message::Text(text) => Frame::Text(text),
        axum_ws::Message::Binary(data) => Frame::Binary(data),
        axum_ws::Message::Ping(data) => Frame::Ping(data),
        axum_ws::Message::Pong(data) => Frame::Pong(data),
        axum_ws::Message::Close(close) => {
            Frame::Close(close.map(|c| (c.code, c.reason.into_owned())))
        }
    }
}

fn to_tungstenite(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close(close) => Message::Close(close.map(|(code, reason)| CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason),
        })),
    }
}

fn from_tungstenite_message(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(close) => {
            Frame::Close(close.map(|c| (u16::from(c.code), c.reason.into_owned())))
        }
        Message::Frame(frame) => Frame::Binary(frame.into_data()),
    }
}
