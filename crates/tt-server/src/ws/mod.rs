//! WebSocket plumbing shared by the setup and mesh sockets
//!
//! - [`frame`]: transport-neutral frames and adapters for axum/tungstenite
//! - [`synced`]: write-serialized connection with keepalive
//! - [`hub`]: typed message dispatch over one connection

pub mod frame;
pub mod hub;
pub mod synced;

pub use frame::{Frame, FrameSink, FrameStream};
pub use hub::{ListenerRegistry, MessageHub, Subscription};
pub use synced::SyncedConnection;

use thiserror::Error;
use tt_protocol::MessageType;

/// Errors on a single WebSocket connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection was closed, locally or by the peer
    #[error("Connection closed")]
    Closed,

    /// No pong arrived before the read deadline
    #[error("Read deadline exceeded")]
    TimedOut,

    /// Underlying WebSocket failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame could not be serialized
    #[error("Failed to encode frame: {0}")]
    Encode(String),

    /// A frame violated the envelope protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl ConnectionError {
    pub(crate) fn transport(e: impl std::fmt::Display) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Errors returned to hub waiters
#[derive(Debug, Error)]
pub enum HubError {
    /// No matching message arrived in time
    #[error("Timed out waiting for {0}")]
    Timeout(MessageType),

    /// The browser sent an error-class message
    #[error("Remote {msg_type}: {message}")]
    Remote {
        msg_type: MessageType,
        message: String,
    },

    /// The hub's read loop has ended
    #[error("Message hub closed")]
    Closed,

    /// Writing to the connection failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
