//! SSH connection with credential retry
//!
//! Dial the target through the mesh, run the handshake with password
//! authentication, and on failure ask the browser for new credentials:
//!
//! ```text
//! Dialing -> Handshaking -> Connected
//!                        -> Retrying (ssh-error, await ssh-config) -> Dialing
//!                        -> Failed (attempts exhausted or no usable config)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh_keys::key::PublicKey;
use tt_core::MeshNode;
use tt_protocol::{Envelope, MessageType, SshSessionConfig, TerminalSize};

use super::{shell, HostTrustNegotiator, SshError};
use crate::bridge::ShellIo;
use crate::ws::MessageHub;

/// An authenticated SSH connection, ready to start a shell
#[async_trait]
pub trait SshClient: Send {
    /// Request a pty of `size` and start an interactive shell
    async fn open_shell(self: Box<Self>, size: TerminalSize) -> Result<ShellIo, SshError>;
}

/// Establishes authenticated SSH connections through the mesh
#[async_trait]
pub trait SshDialer: Send + Sync {
    /// Dial `config.address()` via `node` and authenticate, checking the
    /// host key with `trust`
    async fn connect(
        &self,
        node: &Arc<dyn MeshNode>,
        config: &SshSessionConfig,
        trust: &Arc<HostTrustNegotiator>,
    ) -> Result<Box<dyn SshClient>, SshError>;
}

/// Bounded connect/retry loop for one mesh connection
pub struct SshConnector {
    hub: Arc<MessageHub>,
    trust: Arc<HostTrustNegotiator>,
    dialer: Arc<dyn SshDialer>,
    node: Arc<dyn MeshNode>,
    max_attempts: u32,
}

impl SshConnector {
    /// Create a connector prompting over `hub`
    pub fn new(
        hub: Arc<MessageHub>,
        trust: Arc<HostTrustNegotiator>,
        dialer: Arc<dyn SshDialer>,
        node: Arc<dyn MeshNode>,
        max_attempts: u32,
    ) -> Self {
        Self {
            hub,
            trust,
            dialer,
            node,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Connect with `initial`, retrying with browser-supplied credentials
    ///
    /// On success the browser is sent `ssh-success` and an interactive shell
    /// is opened with the default geometry.
    pub async fn connect(&self, initial: SshSessionConfig) -> Result<ShellIo, SshError> {
        let mut config = initial;
        let mut attempt = 1;

        let client = loop {
            tracing::debug!(
                "SSH attempt {}/{}: {}@{}",
                attempt,
                self.max_attempts,
                config.username,
                config.address()
            );

            let err = match self.dialer.connect(&self.node, &config, &self.trust).await {
                Ok(client) => break client,
                Err(e) => e,
            };

            tracing::warn!("SSH attempt {} to {} failed: {}", attempt, config.address(), err);

            if matches!(err, SshError::HostKeyMismatch { .. }) {
                self.send_best_effort(Envelope::error(err.to_string())).await;
                return Err(err);
            }

            if attempt >= self.max_attempts {
                return Err(SshError::AttemptsExhausted {
                    attempts: attempt,
                    last: err.to_string(),
                });
            }

            config = self.retry_config(&err).await?;
            attempt += 1;
        };

        tracing::info!("SSH connected to {} as {}", config.address(), config.username);
        self.hub
            .send(&Envelope::empty(MessageType::SshSuccess))
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        client.open_shell(TerminalSize::initial()).await
    }

    /// Report `err` and wait for replacement credentials
    async fn retry_config(&self, err: &SshError) -> Result<SshSessionConfig, SshError> {
        let reply = self
            .hub
            .request(
                &Envelope::new(MessageType::SshError, err.to_string()),
                MessageType::SshConfig,
                Duration::ZERO,
            )
            .await
            .map_err(|e| {
                tracing::debug!("No replacement SSH config: {}", e);
                SshError::Config(format!("{} (last SSH error: {})", e, err))
            })?;

        reply.data.parse::<SshSessionConfig>().map_err(|e| {
            SshError::Config(format!("{} (last SSH error: {})", e, err))
        })
    }

    async fn send_best_effort(&self, envelope: Envelope) {
        if let Err(e) = self.hub.send(&envelope).await {
            tracing::debug!("Failed to send {}: {}", envelope.msg_type, e);
        }
    }
}

/// russh handler that defers host key decisions to the trust negotiator
pub struct ClientHandler {
    host: String,
    port: u16,
    trust: Arc<HostTrustNegotiator>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        tracing::debug!(
            "Server host key for {}: {}",
            self.host,
            server_public_key.fingerprint()
        );
        self.trust
            .check(&self.host, self.port, server_public_key)
            .await?;
        Ok(true)
    }
}

/// Dials through the mesh and speaks SSH with russh
pub struct RusshDialer {
    config: Arc<Config>,
}

impl RusshDialer {
    /// Create a dialer with default russh client settings
    pub fn new() -> Self {
        Self {
            config: Arc::new(Config::default()),
        }
    }
}

impl Default for RusshDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SshDialer for RusshDialer {
    async fn connect(
        &self,
        node: &Arc<dyn MeshNode>,
        config: &SshSessionConfig,
        trust: &Arc<HostTrustNegotiator>,
    ) -> Result<Box<dyn SshClient>, SshError> {
        let stream = node.dial(&config.address()).await?;

        let handler = ClientHandler {
            host: config.host.clone(),
            port: config.port,
            trust: Arc::clone(trust),
        };

        let mut handle = client::connect_stream(Arc::clone(&self.config), stream, handler).await?;

        tracing::debug!("Authenticating as user '{}'", config.username);
        let authenticated = handle
            .authenticate_password(config.username.clone(), config.password.clone())
            .await?;

        if !authenticated {
            return Err(SshError::AuthRejected {
                username: config.username.clone(),
                host: config.host.clone(),
            });
        }

        Ok(Box::new(RusshClient { handle }))
    }
}

struct RusshClient {
    handle: Handle<ClientHandler>,
}

#[async_trait]
impl SshClient for RusshClient {
    async fn open_shell(self: Box<Self>, size: TerminalSize) -> Result<ShellIo, SshError> {
        shell::open(self.handle, size).await
    }
}
