//! SSH client side of a session
//!
//! - [`trust`]: interactive trust-on-first-use host key negotiation
//! - [`connector`]: dial + handshake with a bounded credential retry loop
//! - [`shell`]: russh-backed interactive shell driver

pub mod connector;
pub mod shell;
pub mod trust;

pub use connector::{RusshDialer, SshClient, SshConnector, SshDialer};
pub use trust::HostTrustNegotiator;

use thiserror::Error;
use tt_core::{KnownHostsError, MeshError};
use tt_protocol::ProtocolError;

/// SSH connection errors
#[derive(Debug, Error)]
pub enum SshError {
    /// The target could not be reached through the mesh
    #[error("Failed to reach SSH target: {0}")]
    Dial(#[from] MeshError),

    /// SSH protocol or transport failure
    #[error("SSH handshake failed: {0}")]
    Handshake(#[from] russh::Error),

    /// The server refused the credentials
    #[error("Authentication rejected for {username}@{host}")]
    AuthRejected { username: String, host: String },

    /// The user declined an unknown host key, or the prompt failed
    #[error("Host key for {host} was not accepted: {reason}")]
    HostRejected { host: String, reason: String },

    /// The presented key conflicts with a recorded one
    #[error("Host key mismatch for {host} (known_hosts line {line}); refusing to connect")]
    HostKeyMismatch { host: String, line: usize },

    /// The trust store could not be read or updated
    #[error("Known hosts error: {0}")]
    KnownHosts(KnownHostsError),

    /// Every attempt failed
    #[error("Max SSH attempts reached ({attempts}): {last}")]
    AttemptsExhausted { attempts: u32, last: String },

    /// A replacement `ssh-config` could not be obtained or parsed
    #[error("No usable SSH config: {0}")]
    Config(String),

    /// The shell channel could not be opened or has gone away
    #[error("Shell channel error: {0}")]
    Channel(String),
}

impl From<KnownHostsError> for SshError {
    fn from(e: KnownHostsError) -> Self {
        match e {
            KnownHostsError::Mismatch { host, line } => Self::HostKeyMismatch { host, line },
            other => Self::KnownHosts(other),
        }
    }
}

impl From<ProtocolError> for SshError {
    fn from(e: ProtocolError) -> Self {
        Self::Config(e.to_string())
    }
}
