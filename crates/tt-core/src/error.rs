//! Core error types for tailterm

use std::path::PathBuf;
use thiserror::Error;

/// Mesh network errors
#[derive(Error, Debug)]
pub enum MeshError {
    /// The mesh daemon could not be started
    #[error("Failed to start mesh daemon: {0}")]
    Spawn(String),

    /// A mesh CLI command exited unsuccessfully
    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    /// Status output could not be parsed
    #[error("Failed to parse mesh status: {0}")]
    Status(#[from] serde_json::Error),

    /// Outbound connection through the mesh failed
    #[error("Failed to dial {address} through the mesh: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The node has no certificate material for the requested domain
    #[error("Certificate unavailable for {domain}: {reason}")]
    Certificate { domain: String, reason: String },

    /// The node was already shut down
    #[error("Mesh node has been shut down")]
    Shutdown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Known-hosts trust store errors
#[derive(Error, Debug)]
pub enum KnownHostsError {
    /// The host has a recorded key that differs from the presented one
    #[error("Host key for {host} does not match known_hosts line {line}")]
    Mismatch { host: String, line: usize },

    /// The store could not be read or written
    #[error("Known hosts store {path}: {reason}")]
    Store { path: PathBuf, reason: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No home directory to resolve default paths against
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),
}
