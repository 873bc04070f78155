//! Per-session flow on the setup socket

use std::sync::Arc;
use std::time::Duration;

use tt_core::{KnownHosts, MeshNode, MeshProvider, NodeOptions, ServerConfig};
use tt_protocol::{Envelope, MessageType, SshSessionConfig};
use uuid::Uuid;

use super::mesh_server::{self, MeshContext};
use super::status::wait_until_running;
use super::{SessionError, SessionLifecycle};
use crate::ssh::SshDialer;
use crate::ws::frame::{CLOSE_GOING_AWAY, CLOSE_NORMAL};
use crate::ws::{MessageHub, SyncedConnection};

/// Display hostname for a session id, `tailterm-<last uuid group>`
pub fn session_hostname(id: Uuid) -> String {
    let id = id.to_string();
    let suffix = id.rsplit('-').next().unwrap_or(&id);
    format!("tailterm-{}", suffix)
}

/// Runs one browser session from setup socket to teardown
pub struct SessionOrchestrator {
    config: Arc<ServerConfig>,
    provider: Arc<dyn MeshProvider>,
    dialer: Arc<dyn SshDialer>,
}

impl SessionOrchestrator {
    /// Create an orchestrator
    pub fn new(
        config: Arc<ServerConfig>,
        provider: Arc<dyn MeshProvider>,
        dialer: Arc<dyn SshDialer>,
    ) -> Self {
        Self {
            config,
            provider,
            dialer,
        }
    }

    /// Serve one setup socket
    ///
    /// `secure` selects the TLS mesh listener on 443. Returns once the session
    /// has ended and every resource has been released; the setup socket is
    /// closed with the failure text, if any.
    pub async fn run(&self, setup: Arc<SyncedConnection>, secure: bool) {
        let tuning = &self.config.tuning;
        setup.start_keepalive(tuning.ping_interval, tuning.read_deadline);
        let hub = MessageHub::start(Arc::clone(&setup));

        let hostname = session_hostname(Uuid::now_v7());
        tracing::info!("{}: new session (tls: {})", hostname, secure);

        let result = self.run_session(&hostname, &hub, secure).await;

        let (code, reason) = match &result {
            Ok(()) => {
                tracing::info!("{}: session ended", hostname);
                (CLOSE_NORMAL, String::new())
            }
            Err(e) => {
                tracing::warn!("{}: session failed: {}", hostname, e);
                (CLOSE_GOING_AWAY, e.to_string())
            }
        };

        if let Err(e) = setup.write_close(code, &reason).await {
            tracing::debug!("{}: failed to close setup socket: {}", hostname, e);
        }
        setup.close().await;
    }

    async fn run_session(&self, hostname: &str, hub: &Arc<MessageHub>, secure: bool) -> Result<(), SessionError> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("tsnet-{}-", hostname))
            .tempdir()?;

        tracing::info!("{}: creating mesh peer", hostname);
        let node = self
            .provider
            .spawn(NodeOptions {
                hostname: hostname.to_string(),
                state_dir: scratch.path().to_path_buf(),
                control_url: self.config.control_url.clone(),
                ephemeral: true,
            })
            .await?;

        let lifecycle = SessionLifecycle::new();
        let result = self.serve(&node, hub, secure, &lifecycle).await;

        // Release in order: session tasks, mesh peer, scratch directory
        lifecycle.close();
        node.shutdown().await;
        if let Err(e) = scratch.close() {
            tracing::warn!("{}: failed to remove scratch directory: {}", hostname, e);
        }

        result
    }

    async fn serve(
        &self,
        node: &Arc<dyn MeshNode>,
        hub: &Arc<MessageHub>,
        secure: bool,
        lifecycle: &SessionLifecycle,
    ) -> Result<(), SessionError> {
        let tuning = &self.config.tuning;

        let port = if secure { 443 } else { 80 };
        let listener = node.listen(port).await?;

        wait_until_running(node.as_ref(), hub, tuning).await?;

        let peers = node.status().await?.peer_snapshot();
        tracing::debug!("{}: sending {} peers", node.hostname(), peers.len());
        let peers_json = serde_json::to_string(&peers)
            .map_err(|e| SessionError::Setup(format!("failed to encode peers: {}", e)))?;
        hub.send(&Envelope::new(MessageType::Peers, peers_json)).await?;

        let reply = hub.await_msg(MessageType::SshConfig, Duration::ZERO).await?;
        let ssh_config: SshSessionConfig = reply.data.parse()?;
        tracing::info!(
            "{}: target {}@{}",
            node.hostname(),
            ssh_config.username,
            ssh_config.address()
        );

        tokio::spawn(watch_tunnel(
            Arc::clone(hub),
            lifecycle.clone(),
            tuning.tunnel_open_timeout,
            node.hostname().to_string(),
        ));

        let ctx = Arc::new(MeshContext {
            node: Arc::clone(node),
            dialer: Arc::clone(&self.dialer),
            known_hosts: KnownHosts::new(&self.config.known_hosts_path),
            ssh_config,
            tuning: tuning.clone(),
            dev: self.config.dev,
            lifecycle: lifecycle.clone(),
        });

        mesh_server::serve(listener, secure, ctx).await;

        match lifecycle.failure() {
            Some(reason) => Err(SessionError::Failed(reason.to_string())),
            None => Ok(()),
        }
    }
}

/// End the session unless the browser confirms its mesh socket in time
async fn watch_tunnel(hub: Arc<MessageHub>, lifecycle: SessionLifecycle, timeout: Duration, hostname: String) {
    tokio::select! {
        result = hub.await_msg(MessageType::TunnelOpened, timeout) => match result {
            Ok(_) => tracing::info!("{}: browser mesh socket connected", hostname),
            Err(e) => {
                tracing::warn!("{}: mesh socket not confirmed: {}", hostname, e);
                lifecycle.fail(format!("mesh socket not confirmed: {}", e));
            }
        },
        _ = lifecycle.closed() => {}
    }
}
