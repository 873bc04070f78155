//! Tailscale integration for tailterm
//!
//! Each ephemeral peer is a private `tailscaled` running in userspace
//! networking mode with in-memory state, its own control socket and its own
//! SOCKS5 port, driven through the `tailscale` CLI:
//!
//! - `tailscale up` joins the tailnet (printing an auth URL when needed)
//! - `tailscale status --json` is polled for state, addresses and peers
//! - outbound connections go through the daemon's SOCKS5 proxy
//! - mesh ports are forwarded to local listeners with `tailscale serve --tcp`,
//!   applied once the node is running
//! - `tailscale cert` provides TLS material for the node's DNS name

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::status::{BackendState, MeshStatus, NodeStatus};
use super::{socks, CertificatePem, MeshNode, MeshProvider, MeshStream, NodeOptions};
use crate::error::MeshError;

/// How long to wait for a fresh daemon to create its control socket
const DAEMON_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Status response from `tailscale status --json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TailscaleStatus {
    backend_state: String,
    #[serde(rename = "AuthURL", default)]
    auth_url: String,
    #[serde(rename = "Self")]
    self_node: Option<PeerNode>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty_map")]
    peer: HashMap<String, PeerNode>,
}

/// Deserialize null as an empty HashMap
fn deserialize_null_as_empty_map<'de, D, K, V>(deserializer: D) -> Result<HashMap<K, V>, D::Error>
where
    D: serde::Deserializer<'de>,
    K: std::cmp::Eq + std::hash::Hash + Deserialize<'de>,
    V: Deserialize<'de>,
{
    Option::<HashMap<K, V>>::deserialize(deserializer).map(|opt| opt.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PeerNode {
    #[serde(default)]
    host_name: String,
    #[serde(rename = "DNSName", default)]
    dns_name: String,
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Option<Vec<String>>,
    #[serde(default)]
    online: bool,
}

impl From<PeerNode> for NodeStatus {
    fn from(node: PeerNode) -> Self {
        Self {
            host_name: node.host_name,
            dns_name: node.dns_name.trim_end_matches('.').to_string(),
            ips: node.tailscale_ips.unwrap_or_default(),
            online: node.online,
        }
    }
}

/// Parse `tailscale status --json` output
pub fn parse_status(json: &[u8]) -> Result<MeshStatus, MeshError> {
    let status: TailscaleStatus = serde_json::from_slice(json)?;

    Ok(MeshStatus {
        backend_state: BackendState::parse(&status.backend_state),
        auth_url: Some(status.auth_url).filter(|url| !url.is_empty()),
        self_node: status.self_node.map(NodeStatus::from),
        peers: status.peer.into_values().map(NodeStatus::from).collect(),
    })
}

/// Spawns one userspace `tailscaled` per peer
pub struct TailscaledProvider {
    tailscaled_bin: PathBuf,
    tailscale_bin: PathBuf,
}

impl TailscaledProvider {
    /// Create a provider using the given daemon and CLI binaries
    pub fn new(tailscaled_bin: impl Into<PathBuf>, tailscale_bin: impl Into<PathBuf>) -> Self {
        Self {
            tailscaled_bin: tailscaled_bin.into(),
            tailscale_bin: tailscale_bin.into(),
        }
    }
}

#[async_trait]
impl MeshProvider for TailscaledProvider {
    async fn spawn(&self, options: NodeOptions) -> Result<Arc<dyn MeshNode>, MeshError> {
        let socket = options.state_dir.join("tailscaled.sock");
        let socks_addr = free_local_addr()?;

        let state = if options.ephemeral {
            "mem:".to_string()
        } else {
            options.state_dir.join("tailscaled.state").display().to_string()
        };

        tracing::info!(
            "Starting tailscaled for {} (state dir {:?}, socks {})",
            options.hostname,
            options.state_dir,
            socks_addr
        );

        let daemon = Command::new(&self.tailscaled_bin)
            .arg("--tun=userspace-networking")
            .arg(format!("--statedir={}", options.state_dir.display()))
            .arg(format!("--state={}", state))
            .arg(format!("--socket={}", socket.display()))
            .arg(format!("--socks5-server={}", socks_addr))
            .arg("--port=0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MeshError::Spawn(format!("{}: {}", self.tailscaled_bin.display(), e)))?;

        let node = TailscaledNode {
            hostname: options.hostname.clone(),
            state_dir: options.state_dir.clone(),
            socket,
            socks_addr,
            tailscale_bin: self.tailscale_bin.clone(),
            processes: Mutex::new(Processes {
                daemon: Some(daemon),
                login: None,
                pending_forwards: Vec::new(),
            }),
        };

        node.wait_for_socket().await?;

        // `up` blocks until login completes; status polling observes progress
        let mut up = node.cli();
        up.arg("up").arg(format!("--hostname={}", options.hostname));
        if let Some(url) = &options.control_url {
            up.arg(format!("--login-server={}", url));
        }
        let login = up
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MeshError::Spawn(format!("tailscale up: {}", e)))?;

        node.processes.lock().await.login = Some(login);

        Ok(Arc::new(node))
    }
}

struct Processes {
    daemon: Option<Child>,
    login: Option<Child>,
    /// `(mesh port, local port)` pairs to expose once the node is running
    pending_forwards: Vec<(u16, u16)>,
}

/// A running userspace tailscaled peer
pub struct TailscaledNode {
    hostname: String,
    state_dir: PathBuf,
    socket: PathBuf,
    socks_addr: SocketAddr,
    tailscale_bin: PathBuf,
    processes: Mutex<Processes>,
}

impl TailscaledNode {
    /// `tailscale` CLI command bound to this node's socket
    fn cli(&self) -> Command {
        let mut cmd = Command::new(&self.tailscale_bin);
        cmd.arg(format!("--socket={}", self.socket.display()));
        cmd
    }

    /// Run a CLI command to completion and return stdout
    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, MeshError> {
        let output = self
            .cli()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MeshError::Spawn(format!("tailscale {}: {}", args.join(" "), e)))?;

        if !output.status.success() {
            return Err(MeshError::Command {
                command: format!("tailscale {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    async fn wait_for_socket(&self) -> Result<(), MeshError> {
        let deadline = tokio::time::Instant::now() + DAEMON_STARTUP_TIMEOUT;

        while !self.socket.exists() {
            if tokio::time::Instant::now() >= deadline {
                return Err(MeshError::Spawn(format!(
                    "tailscaled did not create {:?} within {:?}",
                    self.socket, DAEMON_STARTUP_TIMEOUT
                )));
            }

            let mut processes = self.processes.lock().await;
            if let Some(daemon) = processes.daemon.as_mut() {
                if let Some(status) = daemon.try_wait()? {
                    return Err(MeshError::Spawn(format!("tailscaled exited: {}", status)));
                }
            }
            drop(processes);

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        Ok(())
    }

    /// Apply port forwards registered before the node was running
    ///
    /// A forward stays pending until its `serve` command succeeds, so a
    /// failure is retried on the next status call.
    async fn apply_pending_forwards(&self) -> Result<(), MeshError> {
        loop {
            let next = self.processes.lock().await.pending_forwards.first().copied();
            let Some(forward) = next else {
                return Ok(());
            };
            let (mesh_port, local_port) = forward;

            tracing::debug!(
                "{}: forwarding mesh port {} to 127.0.0.1:{}",
                self.hostname,
                mesh_port,
                local_port
            );
            self.run(&[
                "serve",
                "--bg",
                &format!("--tcp={}", mesh_port),
                &format!("tcp://127.0.0.1:{}", local_port),
            ])
            .await?;

            self.processes
                .lock()
                .await
                .pending_forwards
                .retain(|pending| *pending != forward);
        }
    }
}

#[async_trait]
impl MeshNode for TailscaledNode {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn status(&self) -> Result<MeshStatus, MeshError> {
        let stdout = self.run(&["status", "--json"]).await?;
        let status = parse_status(&stdout)?;

        if status.is_running() {
            self.apply_pending_forwards().await?;
        }

        Ok(status)
    }

    async fn dial(&self, address: &str) -> Result<MeshStream, MeshError> {
        let dial_err = |source| MeshError::Dial {
            address: address.to_string(),
            source,
        };

        let (host, port) = address
            .rsplit_once(':')
            .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host, port)))
            .ok_or_else(|| {
                dial_err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "address must be host:port",
                ))
            })?;

        let stream = socks::connect(self.socks_addr, host, port)
            .await
            .map_err(dial_err)?;

        Ok(Box::new(stream))
    }

    async fn listen(&self, port: u16) -> Result<TcpListener, MeshError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let local_port = listener.local_addr()?.port();

        self.processes
            .lock()
            .await
            .pending_forwards
            .push((port, local_port));

        Ok(listener)
    }

    async fn certificate(&self, domain: &str) -> Result<CertificatePem, MeshError> {
        let cert_path = self.state_dir.join(format!("{}.crt", domain));
        let key_path = self.state_dir.join(format!("{}.key", domain));

        self.run(&[
            "cert",
            &format!("--cert-file={}", cert_path.display()),
            &format!("--key-file={}", key_path.display()),
            domain,
        ])
        .await
        .map_err(|e| MeshError::Certificate {
            domain: domain.to_string(),
            reason: e.to_string(),
        })?;

        Ok(CertificatePem {
            cert: read_pem(&cert_path).await?,
            key: read_pem(&key_path).await?,
        })
    }

    async fn shutdown(&self) {
        // Logging out removes an ephemeral node from the tailnet immediately
        if let Err(e) = self.run(&["logout"]).await {
            tracing::debug!("{}: logout failed: {}", self.hostname, e);
        }

        let mut processes = self.processes.lock().await;
        for child in [processes.login.take(), processes.daemon.take()]
            .into_iter()
            .flatten()
        {
            let mut child = child;
            if let Err(e) = child.kill().await {
                tracing::debug!("{}: failed to stop process: {}", self.hostname, e);
            }
        }

        tracing::info!("{}: mesh node shut down", self.hostname);
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, MeshError> {
    Ok(tokio::fs::read(path).await?)
}

/// Reserve a free loopback port for the daemon's SOCKS5 server
fn free_local_addr() -> Result<SocketAddr, MeshError> {
    let probe = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(probe.local_addr()?)
}
