//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding envelopes or their payloads
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not a valid JSON envelope (includes unknown message types)
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[from] serde_json::Error),

    /// Envelope could not be encoded
    #[error("Failed to encode envelope: {0}")]
    Encode(String),

    /// `ssh-config` payload did not match `username:password:host:port`
    #[error("Invalid ssh-config payload: expected 4 colon-separated fields, got {0}")]
    SshConfigFields(usize),

    /// `ssh-config` port field was not a valid port number
    #[error("Invalid ssh-config port: {0:?}")]
    SshConfigPort(String),

    /// `size` payload could not be parsed
    #[error("Invalid size payload: {0}")]
    InvalidSize(String),
}
