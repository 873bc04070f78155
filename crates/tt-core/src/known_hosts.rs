//! OpenSSH known_hosts trust store
//!
//! Thin wrapper over the russh-keys known_hosts primitives that separates
//! the three outcomes the trust negotiation cares about: the key is already
//! trusted, the host has no entry at all, or the host has a conflicting entry.
//! Lines are only ever appended.

use std::path::{Path, PathBuf};

use russh_keys::key::PublicKey;

use crate::error::KnownHostsError;

/// Result of checking a presented host key against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// A matching entry exists
    Trusted,
    /// No entry exists for this host
    Unknown,
}

/// Append-only known_hosts file
#[derive(Debug, Clone)]
pub struct KnownHosts {
    path: PathBuf,
}

impl KnownHosts {
    /// Open the store at `path`; the file need not exist yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check a presented key
    ///
    /// Returns `Err(KnownHostsError::Mismatch)` when the host is recorded and
    /// none of its entries is this key, whatever their key type.
    pub fn verify(
        &self,
        host: &str,
        port: u16,
        key: &PublicKey,
    ) -> Result<HostKeyStatus, KnownHostsError> {
        let recorded = russh_keys::known_host_keys_path(host, port, &self.path)
            .map_err(|e| self.store_error(e))?;

        if recorded.iter().any(|(_, known)| known == key) {
            return Ok(HostKeyStatus::Trusted);
        }

        match recorded.first() {
            None => Ok(HostKeyStatus::Unknown),
            Some((line, known)) => {
                tracing::warn!(
                    "{}:{} presented {} key, known_hosts line {} has {}",
                    host,
                    port,
                    key.name(),
                    line,
                    known.name()
                );
                Err(KnownHostsError::Mismatch {
                    host: host.to_string(),
                    line: *line,
                })
            }
        }
    }

    /// Append one entry for `host`/`key`
    pub fn learn(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), KnownHostsError> {
        tracing::info!(
            "Adding {} key for {}:{} to {:?}",
            key.name(),
            host,
            port,
            self.path
        );

        russh_keys::learn_known_hosts_path(host, port, key, &self.path)
            .map_err(|e| self.store_error(e))
    }

    fn store_error(&self, e: russh_keys::Error) -> KnownHostsError {
        KnownHostsError::Store {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}
