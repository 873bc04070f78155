//! russh-backed interactive shell
//!
//! A russh channel delivers stdout, stderr and exit status through a single
//! `wait()` call and needs `&mut` access to do so, so one driver task owns
//! the channel. It fans output into per-stream queues and applies input and
//! resize commands sent by the bridge.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect, Pty};
use tokio::sync::mpsc;
use tt_protocol::TerminalSize;

use super::SshError;
use crate::bridge::{BridgeError, OutputSource, ShellIo, ShellSession};

/// Terminal type requested for every shell
pub const TERM: &str = "xterm-256color";

/// Terminal modes: echo on, 14.4 kbaud in and out
const TERMINAL_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Output chunks buffered per stream before the driver waits on the pump
const OUTPUT_QUEUE_CAPACITY: usize = 64;

/// SSH extended data stream number for stderr
const EXTENDED_DATA_STDERR: u32 = 1;

enum ShellCommand {
    Input(Vec<u8>),
    Resize(TerminalSize),
    Close,
}

/// Open a session channel with a pty and start a shell on it
pub(crate) async fn open<H>(handle: Handle<H>, size: TerminalSize) -> Result<ShellIo, SshError>
where
    H: client::Handler + Send + 'static,
{
    let channel = handle.channel_open_session().await?;

    channel
        .request_pty(
            false,
            TERM,
            u32::from(size.cols),
            u32::from(size.rows),
            0,
            0,
            TERMINAL_MODES,
        )
        .await?;
    channel.request_shell(false).await?;

    tracing::debug!("Shell started on {} pty {}x{}", TERM, size.cols, size.rows);

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (stdout_tx, stdout_rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
    let (stderr_tx, stderr_rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
    let exit_status = Arc::new(Mutex::new(None));

    tokio::spawn(drive(
        handle,
        channel,
        command_rx,
        stdout_tx,
        stderr_tx,
        Arc::clone(&exit_status),
    ));

    Ok(ShellIo {
        session: Arc::new(RusshShell {
            commands: command_tx,
        }),
        stdout: Box::new(ChannelOutput::new(stdout_rx, Arc::clone(&exit_status))),
        stderr: Box::new(ChannelOutput::new(stderr_rx, exit_status)),
    })
}

async fn drive<H>(
    handle: Handle<H>,
    mut channel: Channel<Msg>,
    mut commands: mpsc::UnboundedReceiver<ShellCommand>,
    stdout: mpsc::Sender<Vec<u8>>,
    stderr: mpsc::Sender<Vec<u8>>,
    exit_status: Arc<Mutex<Option<u32>>>,
) where
    H: client::Handler + Send + 'static,
{
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if stdout.send(data.to_vec()).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == EXTENDED_DATA_STDERR => {
                    if stderr.send(data.to_vec()).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                    tracing::debug!("Remote command exit status {}", status);
                    *exit_status.lock() = Some(status);
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            command = commands.recv() => match command {
                Some(ShellCommand::Input(data)) => {
                    if let Err(e) = channel.data(&data[..]).await {
                        tracing::warn!("Failed to write to shell: {}", e);
                        break;
                    }
                }
                Some(ShellCommand::Resize(size)) => {
                    let result = channel
                        .window_change(
                            u32::from(size.cols),
                            u32::from(size.rows),
                            size.pixel_width.unwrap_or(0),
                            size.pixel_height.unwrap_or(0),
                        )
                        .await;
                    if let Err(e) = result {
                        tracing::warn!("Window change failed: {}", e);
                        break;
                    }
                }
                Some(ShellCommand::Close) | None => {
                    let _ = channel.eof().await;
                    break;
                }
            },
        }
    }

    let _ = channel.close().await;
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "session closed", "en")
        .await
    {
        tracing::debug!("SSH disconnect: {}", e);
    }
    tracing::debug!("Shell driver stopped");
}

/// Control handle for a russh shell
struct RusshShell {
    commands: mpsc::UnboundedSender<ShellCommand>,
}

impl RusshShell {
    fn send(&self, command: ShellCommand) -> Result<(), SshError> {
        self.commands
            .send(command)
            .map_err(|_| SshError::Channel("shell driver has stopped".to_string()))
    }
}

#[async_trait]
impl ShellSession for RusshShell {
    async fn write_input(&self, data: &[u8]) -> Result<(), SshError> {
        self.send(ShellCommand::Input(data.to_vec()))
    }

    async fn resize(&self, size: TerminalSize) -> Result<(), SshError> {
        self.send(ShellCommand::Resize(size))
    }

    async fn close(&self) {
        let _ = self.commands.send(ShellCommand::Close);
    }
}

/// One output stream of a russh shell
///
/// Blocks until data arrives, so it never reports an empty read.
struct ChannelOutput {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    exit_status: Arc<Mutex<Option<u32>>>,
}

impl ChannelOutput {
    fn new(rx: mpsc::Receiver<Vec<u8>>, exit_status: Arc<Mutex<Option<u32>>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            exit_status,
        }
    }
}

#[async_trait]
impl OutputSource for ChannelOutput {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        if self.pending.is_empty() {
            match self.rx.recv().await {
                Some(chunk) => self.pending = chunk,
                None => {
                    return Err(match *self.exit_status.lock() {
                        Some(status) => BridgeError::Exited(status),
                        None => BridgeError::ShellClosed,
                    });
                }
            }
        }

        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}
