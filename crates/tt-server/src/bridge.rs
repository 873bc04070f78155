//! Shell ↔ WebSocket I/O bridge
//!
//! Three pumps run concurrently once the shell is up:
//!
//! - shell stdout → `output` envelopes
//! - shell stderr → `output` envelopes
//! - `input` envelopes → shell stdin, `size` envelopes → window change
//!
//! The first pump to stop tears everything down: the connection is closed,
//! the shell is closed, and the session lifecycle ends (failed, unless the
//! remote command exited). A clean remote exit sends a normal-closure close
//! frame first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tt_protocol::{MessageType, OutputDecoder, TerminalSize};

use crate::session::SessionLifecycle;
use crate::ssh::SshError;
use crate::ws::frame::CLOSE_NORMAL;
use crate::ws::{ConnectionError, HubError, Subscription, SyncedConnection};

/// Size of the buffer each output pump reads into
const READ_BUFFER_SIZE: usize = 8192;

/// Errors that stop the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The remote command exited
    #[error("Remote command exited with status {0}")]
    Exited(u32),

    /// The shell channel went away without an exit status
    #[error("Shell channel closed")]
    ShellClosed,

    /// Writing to the shell failed
    #[error(transparent)]
    Shell(#[from] SshError),

    /// Writing to the browser failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The inbound message stream ended or carried an error
    #[error(transparent)]
    Hub(#[from] HubError),
}

/// A byte source from the remote shell
#[async_trait]
pub trait OutputSource: Send {
    /// Read available output into `buf`
    ///
    /// `Ok(0)` means nothing is available yet; the pump retries after a short
    /// delay. End of stream is an error.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError>;
}

/// Control side of an interactive remote shell
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Write bytes to the shell's stdin
    async fn write_input(&self, data: &[u8]) -> Result<(), SshError>;

    /// Send a window-change request
    async fn resize(&self, size: TerminalSize) -> Result<(), SshError>;

    /// Close the shell and its SSH connection
    async fn close(&self);
}

/// An open shell: control handle plus its two output streams
pub struct ShellIo {
    /// Control handle
    pub session: Arc<dyn ShellSession>,
    /// Standard output
    pub stdout: Box<dyn OutputSource>,
    /// Standard error
    pub stderr: Box<dyn OutputSource>,
}

/// Wires one shell to one browser connection
pub struct IoBridge {
    conn: Arc<SyncedConnection>,
    lifecycle: SessionLifecycle,
    idle_delay: Duration,
}

impl IoBridge {
    /// Create a bridge over `conn`, ending `lifecycle` when it stops
    pub fn new(conn: Arc<SyncedConnection>, lifecycle: SessionLifecycle, idle_delay: Duration) -> Self {
        Self {
            conn,
            lifecycle,
            idle_delay,
        }
    }

    /// Run the pumps until the first one stops, then tear down
    ///
    /// `inbound` must be subscribed to `input` and `size`.
    pub async fn run(self, shell: ShellIo, inbound: Subscription) -> Result<(), BridgeError> {
        let ShellIo {
            session,
            mut stdout,
            mut stderr,
        } = shell;

        let result = tokio::select! {
            r = pump_output(&self.conn, stdout.as_mut(), self.idle_delay, "stdout") => r,
            r = pump_output(&self.conn, stderr.as_mut(), self.idle_delay, "stderr") => r,
            r = pump_input(session.as_ref(), inbound) => r,
            _ = self.lifecycle.closed() => Ok(()),
        };

        match &result {
            Err(BridgeError::Exited(status)) => {
                tracing::info!("Remote shell exited with status {}", status);
                if let Err(e) = self.conn.write_close(CLOSE_NORMAL, "").await {
                    tracing::debug!("Failed to send close frame: {}", e);
                }
            }
            Err(e) => tracing::info!("I/O bridge stopped: {}", e),
            Ok(()) => tracing::debug!("I/O bridge stopped by session close"),
        }

        self.conn.close().await;
        session.close().await;

        match result {
            Err(BridgeError::Exited(_)) | Ok(()) => {
                self.lifecycle.close();
                Ok(())
            }
            Err(e) => {
                self.lifecycle.fail(e.to_string());
                Err(e)
            }
        }
    }
}

async fn pump_output(
    conn: &SyncedConnection,
    source: &mut dyn OutputSource,
    idle_delay: Duration,
    name: &str,
) -> Result<(), BridgeError> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut decoder = OutputDecoder::new();

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            tokio::time::sleep(idle_delay).await;
            continue;
        }

        tracing::trace!("{}: {} bytes", name, n);
        if let Some(envelope) = decoder.decode(&buf[..n]) {
            conn.write_json(&envelope).await?;
        }
    }
}

async fn pump_input(session: &dyn ShellSession, mut inbound: Subscription) -> Result<(), BridgeError> {
    while let Some(item) = inbound.recv().await {
        let envelope = item?;

        match envelope.msg_type {
            MessageType::Input => {
                tracing::trace!("input: {} bytes", envelope.data.len());
                session.write_input(envelope.data.as_bytes()).await?;
            }
            MessageType::Size => match TerminalSize::from_payload(&envelope.data) {
                Ok(size) => {
                    tracing::debug!("Resizing terminal to {}x{}", size.cols, size.rows);
                    session.resize(size).await?;
                }
                Err(e) => tracing::warn!("Ignoring malformed size message: {}", e),
            },
            other => tracing::debug!("Ignoring unexpected {} message", other),
        }
    }

    Err(BridgeError::Hub(HubError::Closed))
}
