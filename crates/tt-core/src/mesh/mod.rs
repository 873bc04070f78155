//! Mesh overlay network abstraction
//!
//! Every browser session gets its own ephemeral mesh peer. The session code
//! only talks to the [`MeshProvider`] / [`MeshNode`] traits; the shipped
//! implementation in [`tailscale`] drives a private userspace `tailscaled`.

mod socks;
mod status;
pub mod tailscale;

pub use status::{BackendState, MeshStatus, NodeStatus};
pub use tailscale::TailscaledProvider;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::error::MeshError;

/// Byte stream to a mesh peer
pub trait MeshIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> MeshIo for T {}

/// Boxed outbound connection through the mesh
pub type MeshStream = Box<dyn MeshIo>;

/// Options for creating an ephemeral mesh peer
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Hostname the peer registers with
    pub hostname: String,
    /// Scratch directory for the peer's local state
    pub state_dir: PathBuf,
    /// Control-plane URL (vendor default when unset)
    pub control_url: Option<String>,
    /// Whether the peer is removed from the mesh when it goes offline
    pub ephemeral: bool,
}

/// PEM-encoded certificate chain and private key
#[derive(Clone)]
pub struct CertificatePem {
    /// Certificate chain
    pub cert: Vec<u8>,
    /// Private key
    pub key: Vec<u8>,
}

/// Creates mesh peers
#[async_trait]
pub trait MeshProvider: Send + Sync {
    /// Start a new peer; it joins the mesh asynchronously, observe progress with [`MeshNode::status`]
    async fn spawn(&self, options: NodeOptions) -> Result<Arc<dyn MeshNode>, MeshError>;
}

/// One running mesh peer
#[async_trait]
pub trait MeshNode: Send + Sync {
    /// Hostname the peer was created with
    fn hostname(&self) -> &str;

    /// Current status, always queried live
    async fn status(&self) -> Result<MeshStatus, MeshError>;

    /// Open a TCP connection to `address` (`host:port`) through the mesh
    async fn dial(&self, address: &str) -> Result<MeshStream, MeshError>;

    /// Accept TCP connections arriving on mesh port `port`
    async fn listen(&self, port: u16) -> Result<TcpListener, MeshError>;

    /// Certificate material for the peer's own DNS name
    async fn certificate(&self, domain: &str) -> Result<CertificatePem, MeshError>;

    /// Leave the mesh and release local resources
    async fn shutdown(&self);
}
