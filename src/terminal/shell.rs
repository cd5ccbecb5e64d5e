//! Live interactive shell handles.
//!
//! A [`ShellSession`] is what a connector hands back after the pty and shell
//! are running: a control handle for stdin, window changes and teardown, plus
//! the two output streams. Output is demultiplexed by a dispatcher task into
//! bounded channels; both channels end when the remote side sends EOF/close
//! or when the shell is closed locally.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use russh::client;
use russh::{ChannelReadHalf, ChannelWriteHalf, Disconnect};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::terminal::error::TerminalError;
use crate::terminal::session::SshClientHandler;

/// Control surface of a running remote shell.
#[async_trait]
pub trait ShellHandle: Send + Sync {
    /// Write raw bytes to the shell's stdin.
    async fn write(&self, data: &[u8]) -> Result<(), TerminalError>;

    /// Send a window-change request. Nothing else about the session changes.
    async fn resize(&self, cols: u32, rows: u32) -> Result<(), TerminalError>;

    /// Close the shell channel, then the transport.
    ///
    /// Safe to call more than once; only the first call releases anything.
    /// Both output streams end once this returns.
    async fn close(&self);
}

/// Output streams of a running shell.
pub struct ShellOutput {
    pub stdout: mpsc::Receiver<Vec<u8>>,
    pub stderr: mpsc::Receiver<Vec<u8>>,
}

/// A started shell: control handle plus its output streams.
pub struct ShellSession {
    pub handle: Arc<dyn ShellHandle>,
    pub output: ShellOutput,
}

/// Channel writer wrapper for sending input to a shell.
///
/// Wraps `ChannelWriteHalf` from russh's `Channel::split()`, so writes never
/// contend with the dispatcher reading the other half.
pub struct ChannelWriter {
    pub(crate) write_half: ChannelWriteHalf<client::Msg>,
}

impl ChannelWriter {
    /// Create a new channel writer from a channel write half.
    pub fn new(write_half: ChannelWriteHalf<client::Msg>) -> Self {
        Self { write_half }
    }

    /// Send data (text, keystrokes, escape sequences) to the shell.
    pub async fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        self.write_half
            .data(data)
            .await
            .map_err(|e| TerminalError::ShellIo(format!("failed to write to shell: {}", e)))
    }

    /// Tell the remote pty about new dimensions.
    pub async fn resize(&self, cols: u32, rows: u32) -> Result<(), TerminalError> {
        self.write_half
            .window_change(cols, rows, 0, 0)
            .await
            .map_err(|e| TerminalError::ShellIo(format!("failed to resize shell: {}", e)))
    }

    /// Send EOF, then close the channel.
    pub async fn close(&self) -> Result<(), TerminalError> {
        // EOF may be refused if the remote already closed; close is what matters.
        let _ = self.write_half.eof().await;
        self.write_half
            .close()
            .await
            .map_err(|e| TerminalError::ShellIo(format!("failed to close shell channel: {}", e)))
    }
}

/// Shell running over a russh session channel.
pub struct SshShell {
    writer: Mutex<ChannelWriter>,
    handle: client::Handle<SshClientHandler>,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SshShell {
    pub fn new(
        writer: ChannelWriter,
        handle: client::Handle<SshClientHandler>,
        dispatcher: JoinHandle<()>,
    ) -> Self {
        Self {
            writer: Mutex::new(writer),
            handle,
            dispatcher: StdMutex::new(Some(dispatcher)),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), TerminalError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TerminalError::ShellIo("shell is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ShellHandle for SshShell {
    async fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        self.ensure_open()?;
        self.writer.lock().await.write(data).await
    }

    async fn resize(&self, cols: u32, rows: u32) -> Result<(), TerminalError> {
        self.ensure_open()?;
        self.writer.lock().await.resize(cols, rows).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // A writer stuck on a full window holds the lock; the disconnect
        // below unblocks it, so skip the polite channel close in that case.
        match self.writer.try_lock() {
            Ok(writer) => {
                if let Err(e) = writer.close().await {
                    debug!("Shell channel close: {}", e);
                }
            }
            Err(_) => debug!("Shell writer busy, closing transport directly"),
        }

        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "Terminal session closed", "en")
            .await
        {
            warn!("Error during SSH disconnect: {}", e);
        }

        let dispatcher = match self.dispatcher.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = dispatcher {
            task.abort();
        }
    }
}

/// Route channel messages into the stdout/stderr queues until the channel ends.
///
/// `pending` holds output that arrived while the pty and shell requests were
/// still being answered.
pub(crate) async fn dispatch_output(
    mut read_half: ChannelReadHalf,
    pending: Vec<Vec<u8>>,
    stdout: mpsc::Sender<Vec<u8>>,
    stderr: mpsc::Sender<Vec<u8>>,
) {
    use russh::ChannelMsg;

    for chunk in pending {
        if stdout.send(chunk).await.is_err() {
            return;
        }
    }

    loop {
        match read_half.wait().await {
            Some(ChannelMsg::Data { data }) => {
                if stdout.send(data.to_vec()).await.is_err() {
                    break;
                }
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    if stderr.send(data.to_vec()).await.is_err() {
                        break;
                    }
                } else {
                    debug!("Ignoring extended data stream {}", ext);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                debug!("Remote shell exited with status {}", exit_status);
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                debug!("Shell channel ended");
                break;
            }
            Some(_) => {}
        }
    }
}
