//! SSH connector: dial, authenticate, allocate a pty and start a shell.
//!
//! # Open sequence
//!
//! 1. Select the authentication strategy ([`auth_for`]); key material is
//!    parsed here, before any network traffic.
//! 2. Dial `ip:port` with a bounded connect timeout.
//! 3. Authenticate.
//! 4. Open a session channel, request an `xterm-256color` pty and a shell.
//! 5. Split the channel and spawn the output dispatcher.
//!
//! Any failing step releases what was opened so far in reverse order (channel
//! before transport) and returns the error. Nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{Channel, ChannelMsg, Disconnect, Pty, client};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::terminal::auth::auth_for;
use crate::terminal::error::TerminalError;
use crate::terminal::session::SshClientHandler;
use crate::terminal::shell::{ChannelWriter, ShellOutput, ShellSession, SshShell, dispatch_output};
use crate::terminal::types::{Credential, Host, TerminalSize};

/// Terminal type requested for every pty.
pub const TERMINAL_TYPE: &str = "xterm-256color";

/// Chunks buffered per output stream between the dispatcher and the pumps.
const OUTPUT_CHANNEL_DEPTH: usize = 32;

/// Pty modes: echo on, 14400 baud in and out.
const TERMINAL_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Opens interactive shells on managed hosts.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn open(
        &self,
        host: &Host,
        credential: &Credential,
        size: TerminalSize,
    ) -> Result<ShellSession, TerminalError>;
}

/// russh-backed connector.
pub struct SshConnector {
    connect_timeout: Duration,
    compress: bool,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration, compress: bool) -> Self {
        Self {
            connect_timeout,
            compress,
        }
    }
}

/// Build SSH client configuration for an interactive terminal.
///
/// Terminal sessions may sit idle for long stretches, so there is no
/// inactivity timeout; keepalives detect dead peers instead.
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Login name: the host's configured SSH user, else the credential's username.
pub(crate) fn login_user<'a>(host: &'a Host, credential: &'a Credential) -> &'a str {
    if host.ssh_user.trim().is_empty() {
        &credential.username
    } else {
        &host.ssh_user
    }
}

async fn disconnect_quietly(handle: &client::Handle<SshClientHandler>, reason: &str) {
    if let Err(e) = handle.disconnect(Disconnect::ByApplication, reason, "en").await {
        debug!("Disconnect after failed open: {}", e);
    }
}

/// Send a channel request with `want_reply` and wait for the verdict.
///
/// Output arriving before the reply is kept in `pending`.
async fn await_reply(
    channel: &mut Channel<client::Msg>,
    what: &str,
    pending: &mut Vec<Vec<u8>>,
) -> Result<(), TerminalError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(TerminalError::ConnectFailed(format!(
                    "{} request rejected by server",
                    what
                )));
            }
            Some(ChannelMsg::Data { data }) => pending.push(data.to_vec()),
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                return Err(TerminalError::ConnectFailed(format!(
                    "channel closed during {} request",
                    what
                )));
            }
            Some(_) => {}
        }
    }
}

async fn start_terminal(
    channel: &mut Channel<client::Msg>,
    size: TerminalSize,
    pending: &mut Vec<Vec<u8>>,
) -> Result<(), TerminalError> {
    channel
        .request_pty(
            true,
            TERMINAL_TYPE,
            u32::from(size.cols),
            u32::from(size.rows),
            0,
            0,
            TERMINAL_MODES,
        )
        .await
        .map_err(|e| TerminalError::ConnectFailed(format!("pty request failed: {}", e)))?;
    await_reply(channel, "pty", pending).await?;

    channel
        .request_shell(true)
        .await
        .map_err(|e| TerminalError::ConnectFailed(format!("shell request failed: {}", e)))?;
    await_reply(channel, "shell", pending).await
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn open(
        &self,
        host: &Host,
        credential: &Credential,
        size: TerminalSize,
    ) -> Result<ShellSession, TerminalError> {
        let auth = auth_for(credential)?;
        let username = login_user(host, credential);
        let config = build_client_config(self.compress);
        let handler = SshClientHandler::new(host.address());

        let connect_future = client::connect(config, (host.ip.as_str(), host.port), handler);
        let mut handle = tokio::time::timeout(self.connect_timeout, connect_future)
            .await
            .map_err(|_| {
                TerminalError::ConnectFailed(format!(
                    "connection to {} timed out after {:?}",
                    host.address(),
                    self.connect_timeout
                ))
            })?
            .map_err(|e| TerminalError::ConnectFailed(format!("failed to connect: {}", e)))?;

        match auth.authenticate(&mut handle, username).await {
            Ok(true) => {}
            Ok(false) => {
                disconnect_quietly(&handle, "Authentication failed").await;
                return Err(TerminalError::ConnectFailed(format!(
                    "{} authentication rejected for user {}",
                    auth.name(),
                    username
                )));
            }
            Err(e) => {
                disconnect_quietly(&handle, "Authentication failed").await;
                return Err(e);
            }
        }
        debug!(host_id = host.id, method = auth.name(), "SSH authentication succeeded");

        let mut channel = match handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(e) => {
                disconnect_quietly(&handle, "Channel open failed").await;
                return Err(TerminalError::ConnectFailed(format!(
                    "failed to open channel: {}",
                    e
                )));
            }
        };

        let mut pending = Vec::new();
        if let Err(e) = start_terminal(&mut channel, size, &mut pending).await {
            if let Err(close_err) = channel.close().await {
                warn!("Failed to close channel after terminal setup error: {}", close_err);
            }
            disconnect_quietly(&handle, "Terminal setup failed").await;
            return Err(e);
        }

        let (read_half, write_half) = channel.split();
        let (stdout_tx, stdout_rx) = mpsc::channel(OUTPUT_CHANNEL_DEPTH);
        let (stderr_tx, stderr_rx) = mpsc::channel(OUTPUT_CHANNEL_DEPTH);
        let dispatcher = tokio::spawn(dispatch_output(read_half, pending, stdout_tx, stderr_tx));

        info!(
            host_id = host.id,
            target = %host.address(),
            cols = size.cols,
            rows = size.rows,
            "Interactive shell started"
        );

        Ok(ShellSession {
            handle: Arc::new(SshShell::new(ChannelWriter::new(write_half), handle, dispatcher)),
            output: ShellOutput {
                stdout: stdout_rx,
                stderr: stderr_rx,
            },
        })
    }
}
