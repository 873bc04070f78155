//! Interactive host key trust
//!
//! Keys already in known_hosts pass silently. A host with no entry pauses
//! the handshake: the browser is asked (`ssh-host`), and only an explicit
//! accept (`ssh-host-action`) records the key. A host whose recorded key
//! differs is refused outright, never offered for override.

use std::sync::Arc;
use std::time::Duration;

use russh_keys::key::PublicKey;
use tt_core::{HostKeyStatus, KnownHosts};
use tt_protocol::{Envelope, MessageType, TrustDecision};

use super::SshError;
use crate::ws::MessageHub;

/// Host key verifier that asks the browser about unknown hosts
pub struct HostTrustNegotiator {
    known_hosts: KnownHosts,
    hub: Arc<MessageHub>,
}

impl HostTrustNegotiator {
    /// Create a negotiator prompting over `hub`
    pub fn new(known_hosts: KnownHosts, hub: Arc<MessageHub>) -> Self {
        Self { known_hosts, hub }
    }

    /// Decide whether the handshake with `host:port` may continue
    pub async fn check(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        match self.known_hosts.verify(host, port, key)? {
            HostKeyStatus::Trusted => {
                tracing::debug!("Host key for {}:{} is trusted", host, port);
                Ok(())
            }
            HostKeyStatus::Unknown => self.prompt(host, port, key).await,
        }
    }

    async fn prompt(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        tracing::info!(
            "Unknown {} host key for {}:{} ({}), asking browser",
            key.name(),
            host,
            port,
            key.fingerprint()
        );

        let rejected = |reason: String| SshError::HostRejected {
            host: host.to_string(),
            reason,
        };

        let reply = self
            .hub
            .request(
                &Envelope::new(MessageType::SshHost, host),
                MessageType::SshHostAction,
                Duration::ZERO,
            )
            .await
            .map_err(|e| rejected(e.to_string()))?;

        match TrustDecision::from_payload(&reply.data) {
            TrustDecision::Accept => {
                self.known_hosts.learn(host, port, key)?;

                match self.known_hosts.verify(host, port, key)? {
                    HostKeyStatus::Trusted => Ok(()),
                    HostKeyStatus::Unknown => {
                        Err(rejected("key not found after updating known_hosts".to_string()))
                    }
                }
            }
            TrustDecision::Reject => {
                tracing::info!("Browser rejected host key for {}", host);
                Err(rejected("rejected by user".to_string()))
            }
        }
    }
}
