//! Waiting for an ephemeral peer to join the mesh

use tt_core::mesh::BackendState;
use tt_core::{MeshNode, MeshStatus, SessionTuning};
use tt_protocol::Envelope;

use crate::ws::MessageHub;

use super::SessionError;

/// Poll `node` until it is running, reporting progress to the browser
///
/// The login URL is sent once. On success the browser gets the node's DNS
/// name and addresses. A failed status call or running out of polls sends an
/// error envelope and fails.
pub async fn wait_until_running(
    node: &dyn MeshNode,
    hub: &MessageHub,
    tuning: &SessionTuning,
) -> Result<MeshStatus, SessionError> {
    let mut auth_delivered = false;

    for poll in 0..tuning.status_poll_attempts {
        if poll > 0 {
            tokio::time::sleep(tuning.status_poll_interval).await;
        }

        let status = match node.status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("{}: status poll {} failed: {}", node.hostname(), poll, e);
                report(hub, format!("{} status failed: {}", node.hostname(), e)).await;
                return Err(e.into());
            }
        };

        match &status.backend_state {
            BackendState::Running => {
                let message = running_message(&status);
                tracing::info!("{}: {}", node.hostname(), message.trim_end());
                hub.send(&Envelope::info(message)).await?;
                return Ok(status);
            }
            BackendState::NeedsLogin if !auth_delivered => {
                if let Some(url) = &status.auth_url {
                    tracing::info!("{}: waiting for login at {}", node.hostname(), url);
                    hub.send(&Envelope::info(format!("Auth required. Go to: {}\r\n", url)))
                        .await?;
                    auth_delivered = true;
                }
            }
            other => tracing::trace!("{}: backend state {:?}", node.hostname(), other),
        }
    }

    let message = format!("{} init timed out.", node.hostname());
    report(hub, message.clone()).await;
    Err(SessionError::Setup(message))
}

async fn report(hub: &MessageHub, message: String) {
    if let Err(e) = hub.send(&Envelope::error(format!("{}\r\n", message))).await {
        tracing::debug!("Failed to report setup failure: {}", e);
    }
}

fn running_message(status: &MeshStatus) -> String {
    let (name, ipv4, ipv6) = match &status.self_node {
        Some(me) => (
            me.dns_name.as_str(),
            me.ipv4().unwrap_or("-"),
            me.ipv6().unwrap_or("-"),
        ),
        None => ("-", "-", "-"),
    };

    format!("Tailscale machine {} at {} {}\r\n", name, ipv4, ipv6)
}
