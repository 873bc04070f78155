//! Per-browser session orchestration
//!
//! One session per `GET /ts` upgrade: an ephemeral mesh peer is created,
//! the browser is walked through login and peer selection on the setup
//! socket, and the SSH shell is served to the browser's second socket on
//! the peer's mesh address.

mod lifecycle;
pub mod mesh_server;
mod orchestrator;
pub mod origin;
pub mod status;

pub use lifecycle::SessionLifecycle;
pub use mesh_server::MeshContext;
pub use orchestrator::{session_hostname, SessionOrchestrator};

use thiserror::Error;
use tt_core::MeshError;
use tt_protocol::ProtocolError;

use crate::bridge::BridgeError;
use crate::ssh::SshError;
use crate::ws::HubError;

/// Errors that end a session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Setup could not complete
    #[error("{0}")]
    Setup(String),

    /// A session task failed after setup
    #[error("{0}")]
    Failed(String),

    /// Mesh peer failure
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// Setup socket failure or remote error
    #[error(transparent)]
    Hub(#[from] HubError),

    /// Malformed browser payload
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// SSH could not be established
    #[error(transparent)]
    Ssh(#[from] SshError),

    /// The shell bridge failed
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// TLS material could not be loaded
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// WebSocket upgrade failed
    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(String),

    /// Local I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
