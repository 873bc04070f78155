//! Shared fakes for tt-server integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use tt_core::mesh::{BackendState, CertificatePem, MeshStream, NodeStatus};
use tt_core::{MeshError, MeshNode, MeshProvider, MeshStatus, NodeOptions};
use tt_protocol::{Envelope, MessageType, SshSessionConfig, TerminalSize};
use tt_server::bridge::{BridgeError, OutputSource, ShellIo, ShellSession};
use tt_server::ssh::{HostTrustNegotiator, SshClient, SshDialer, SshError};
use tt_server::ws::frame::{duplex, Frame, FrameSink, FrameStream};
use tt_server::ws::{MessageHub, SyncedConnection};

// ---------------------------------------------------------------------------
// Browser side of an in-memory WebSocket
// ---------------------------------------------------------------------------

/// The browser end of a hub under test
pub struct Browser {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// A hub over an in-memory connection, plus the browser facing it
pub fn hub_pair() -> (Arc<MessageHub>, Browser) {
    let (conn, browser) = conn_pair();
    (MessageHub::start(conn), browser)
}

/// A connection over an in-memory socket, plus the browser facing it
pub fn conn_pair() -> (Arc<SyncedConnection>, Browser) {
    let ((sink, stream), (peer_sink, peer_stream)) = duplex();
    (
        SyncedConnection::new(sink, stream),
        Browser {
            sink: peer_sink,
            stream: peer_stream,
        },
    )
}

impl Browser {
    /// Send an envelope to the server
    pub async fn send(&mut self, msg_type: MessageType, data: &str) {
        let text = Envelope::new(msg_type, data).to_json().unwrap();
        self.sink.send(Frame::Text(text)).await.unwrap();
    }

    /// Send a reply once the server has a waiter registered for it
    pub async fn reply(&mut self, hub: &MessageHub, msg_type: MessageType, data: &str) {
        while hub.registry().pending(msg_type) == 0 {
            tokio::task::yield_now().await;
        }
        self.send(msg_type, data).await;
    }

    /// Next frame, skipping pings
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.stream.next().await {
                Some(Ok(Frame::Ping(_))) => continue,
                Some(Ok(frame)) => return Some(frame),
                _ => return None,
            }
        }
    }

    /// Next envelope; panics on anything else
    pub async fn recv(&mut self) -> Envelope {
        match self.next_frame().await {
            Some(Frame::Text(text)) => Envelope::from_json(&text).unwrap(),
            other => panic!("expected envelope, got {:?}", other),
        }
    }

    /// Read until a close frame arrives
    pub async fn recv_close(&mut self) -> Option<(u16, String)> {
        loop {
            match self.next_frame().await {
                Some(Frame::Close(close)) => return close,
                Some(_) => continue,
                None => panic!("stream ended without a close frame"),
            }
        }
    }

    /// Whether a frame is ready right now
    pub fn has_pending_frame(&mut self) -> bool {
        futures::FutureExt::now_or_never(self.stream.next()).flatten().is_some()
    }
}

// ---------------------------------------------------------------------------
// Mesh
// ---------------------------------------------------------------------------

pub fn node_status(dns: &str, ips: &[&str]) -> NodeStatus {
    NodeStatus {
        host_name: dns.split('.').next().unwrap_or(dns).to_string(),
        dns_name: dns.to_string(),
        ips: ips.iter().map(|s| s.to_string()).collect(),
        online: true,
    }
}

pub fn needs_login(url: &str) -> MeshStatus {
    MeshStatus {
        backend_state: BackendState::NeedsLogin,
        auth_url: Some(url.to_string()),
        self_node: None,
        peers: Vec::new(),
    }
}

pub fn running() -> MeshStatus {
    MeshStatus {
        backend_state: BackendState::Running,
        auth_url: None,
        self_node: Some(node_status(
            "tailterm-test.tailnet.ts.net",
            &["127.0.0.1", "fd7a:115c:a1e0::1"],
        )),
        peers: vec![node_status("lab-server.tailnet.ts.net", &["100.64.0.5"])],
    }
}

/// Mesh node replaying a list of statuses, repeating the last one
pub struct FakeNode {
    hostname: String,
    statuses: Mutex<VecDeque<MeshStatus>>,
    pub status_calls: AtomicUsize,
    pub shut_down: AtomicBool,
    pub listening: Mutex<Option<std::net::SocketAddr>>,
}

impl FakeNode {
    pub fn new(hostname: &str, statuses: Vec<MeshStatus>) -> Arc<Self> {
        Arc::new(Self {
            hostname: hostname.to_string(),
            statuses: Mutex::new(statuses.into()),
            status_calls: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
            listening: Mutex::new(None),
        })
    }
}

#[async_trait]
impl MeshNode for FakeNode {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn status(&self) -> Result<MeshStatus, MeshError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        status.ok_or(MeshError::Shutdown)
    }

    async fn dial(&self, address: &str) -> Result<MeshStream, MeshError> {
        Err(MeshError::Dial {
            address: address.to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        })
    }

    async fn listen(&self, _port: u16) -> Result<TcpListener, MeshError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        *self.listening.lock() = Some(listener.local_addr()?);
        Ok(listener)
    }

    async fn certificate(&self, domain: &str) -> Result<CertificatePem, MeshError> {
        Err(MeshError::Certificate {
            domain: domain.to_string(),
            reason: "no certificates in tests".to_string(),
        })
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Provider handing out one prepared node and remembering its options
pub struct FakeProvider {
    pub node: Arc<FakeNode>,
    pub spawned: Mutex<Vec<NodeOptions>>,
}

impl FakeProvider {
    pub fn new(node: Arc<FakeNode>) -> Arc<Self> {
        Arc::new(Self {
            node,
            spawned: Mutex::new(Vec::new()),
        })
    }

    pub fn state_dirs(&self) -> Vec<PathBuf> {
        self.spawned.lock().iter().map(|o| o.state_dir.clone()).collect()
    }
}

#[async_trait]
impl MeshProvider for FakeProvider {
    async fn spawn(&self, options: NodeOptions) -> Result<Arc<dyn MeshNode>, MeshError> {
        assert!(options.state_dir.exists());
        self.spawned.lock().push(options);
        Ok(Arc::clone(&self.node) as Arc<dyn MeshNode>)
    }
}

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

/// What a scripted output stream produces next
#[derive(Debug)]
pub enum Output {
    Data(Vec<u8>),
    /// A read that finds nothing yet
    Empty,
    Exit(u32),
    Fail,
}

/// Recording shell
#[derive(Default)]
pub struct FakeShell {
    pub input: Mutex<Vec<u8>>,
    pub resizes: Mutex<Vec<TerminalSize>>,
    pub closed: AtomicBool,
}

#[async_trait]
impl ShellSession for FakeShell {
    async fn write_input(&self, data: &[u8]) -> Result<(), SshError> {
        self.input.lock().extend_from_slice(data);
        Ok(())
    }

    async fn resize(&self, size: TerminalSize) -> Result<(), SshError> {
        self.resizes.lock().push(size);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct ScriptedOutput {
    rx: mpsc::UnboundedReceiver<Output>,
}

#[async_trait]
impl OutputSource for ScriptedOutput {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        match self.rx.recv().await {
            Some(Output::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Output::Empty) => Ok(0),
            Some(Output::Exit(status)) => Err(BridgeError::Exited(status)),
            Some(Output::Fail) | None => Err(BridgeError::ShellClosed),
        }
    }
}

/// Senders driving a fake shell's output streams
pub struct ShellScript {
    pub stdout: mpsc::UnboundedSender<Output>,
    pub stderr: mpsc::UnboundedSender<Output>,
}

/// A fake shell, its output script, and the I/O handle to give the bridge
pub fn fake_shell() -> (Arc<FakeShell>, ShellScript, ShellIo) {
    let shell = Arc::new(FakeShell::default());
    let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
    let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();

    let io = ShellIo {
        session: Arc::clone(&shell) as Arc<dyn ShellSession>,
        stdout: Box::new(ScriptedOutput { rx: stdout_rx }),
        stderr: Box::new(ScriptedOutput { rx: stderr_rx }),
    };
    let script = ShellScript {
        stdout: stdout_tx,
        stderr: stderr_tx,
    };

    (shell, script, io)
}

/// Wait until `check` holds, polling every few milliseconds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ---------------------------------------------------------------------------
// SSH
// ---------------------------------------------------------------------------

struct FakeClient {
    io: ShellIo,
}

#[async_trait]
impl SshClient for FakeClient {
    async fn open_shell(self: Box<Self>, _size: TerminalSize) -> Result<ShellIo, SshError> {
        Ok(self.io)
    }
}

/// Dialer failing with scripted errors before handing out prepared shells
#[derive(Default)]
pub struct FakeDialer {
    failures: Mutex<VecDeque<SshError>>,
    shells: Mutex<VecDeque<ShellIo>>,
    pub attempts: Mutex<Vec<SshSessionConfig>>,
}

impl FakeDialer {
    pub fn new(failures: Vec<SshError>, shells: Vec<ShellIo>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures.into()),
            shells: Mutex::new(shells.into()),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl SshDialer for FakeDialer {
    async fn connect(
        &self,
        _node: &Arc<dyn MeshNode>,
        config: &SshSessionConfig,
        _trust: &Arc<HostTrustNegotiator>,
    ) -> Result<Box<dyn SshClient>, SshError> {
        self.attempts.lock().push(config.clone());

        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        let io = self
            .shells
            .lock()
            .pop_front()
            .ok_or_else(|| SshError::Channel("no shell prepared".to_string()))?;
        Ok(Box::new(FakeClient { io }))
    }
}

pub fn auth_rejected() -> SshError {
    SshError::AuthRejected {
        username: "alice".to_string(),
        host: "lab-server".to_string(),
    }
}

pub fn ssh_config() -> SshSessionConfig {
    "alice:secret:lab-server:22".parse().unwrap()
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// A real `ssh-rsa` public key line body
pub const RSA_HOST_KEY: &str = "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAAAgQCiCoTlEQToxshjFabfdqde0Pb2+Q+ijbHoodUkym5851hn2KjSAqSOSvHBDThULAyb+jM0d3qALIBz+ZZDV5y3TeJMEE5IFFJffm7l1rLasPWaIcsmlnfmouKQtiNwqOXB2oYcsqaITx7TxB2UsyFmq8B15lMeoxWOjlwCNidchw==";

pub fn public_key() -> russh_keys::key::PublicKey {
    russh_keys::key::KeyPair::generate_ed25519()
        .unwrap()
        .clone_public_key()
        .unwrap()
}

pub fn line_count(path: &std::path::Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0)
}
