//! WebSocket to SSH byte pump for one terminal connection.
//!
//! # States
//!
//! `Connecting -> Active -> Closing -> Closed`
//!
//! - **Connecting**: the session is being created. On failure the client gets
//!   one human-readable text frame followed by a close frame (1011) whose
//!   reason is the error's `kind()`.
//! - **Active**: two pumps drain the shell's stdout and stderr, record each
//!   chunk as an `"o"` event and queue it as a binary frame. A single writer
//!   task owns the socket sink and drains that bounded queue, so a slow client
//!   blocks the pumps instead of growing memory. The caller's task reads
//!   client frames, renewing an inactivity deadline on every frame.
//! - **Closing**: entered on a client read error, close frame, inactivity
//!   timeout or EOF on either shell stream. The shell and transport are
//!   force-closed so both pumps return; the bridge waits for them, gives the
//!   writer `flush_timeout` to drain (aborting it after that) and then closes
//!   the registry entry.
//!
//! Registry close runs exactly once per bridge via [`CloseGuard`], including
//! when the bridge future is dropped mid-flight.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use poem::web::websocket::{CloseCode, Message};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::terminal::config::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_OUTPUT_QUEUE};
use crate::terminal::error::TerminalError;
use crate::terminal::message::creation_failure_text;
use crate::terminal::storage::{TerminalRegistry, TerminalSession};
use crate::terminal::types::{Operator, TerminalSize};

/// Time allowed for queued output to reach the client once closing starts.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connecting,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Inactivity deadline, renewed on every received frame.
    pub idle_timeout: Duration,
    /// Output chunks queued for the socket writer.
    pub output_queue: usize,
    /// How long the socket writer may take to drain after closing starts.
    /// A writer still blocked after this is aborted with its sink.
    pub flush_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            output_queue: DEFAULT_OUTPUT_QUEUE,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

/// What an inbound WebSocket frame means for the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Raw bytes for the shell's stdin.
    Input(Vec<u8>),
    /// Window change; never recorded or forwarded as input.
    Resize(TerminalSize),
    /// Control traffic with no terminal effect.
    Ignored,
    /// Client closed the socket.
    Close,
}

/// Control messages carried in text frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Resize { cols: f64, rows: f64 },
}

fn dimension(value: f64) -> Option<u16> {
    if !value.is_finite() || value < 1.0 || value > f64::from(u16::MAX) {
        return None;
    }
    Some(value.trunc() as u16)
}

fn classify_text(text: String) -> ClientFrame {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
        return ClientFrame::Input(text.into_bytes());
    };

    if value.get("type").and_then(|t| t.as_str()) != Some("resize") {
        return ClientFrame::Input(text.into_bytes());
    }

    match serde_json::from_value::<ControlMessage>(value) {
        Ok(ControlMessage::Resize { cols, rows }) => match (dimension(cols), dimension(rows)) {
            (Some(cols), Some(rows)) => ClientFrame::Resize(TerminalSize { cols, rows }),
            _ => {
                warn!(cols, rows, "Ignoring resize with invalid dimensions");
                ClientFrame::Ignored
            }
        },
        Err(e) => {
            debug!("Resize message without numeric dimensions, forwarding as input: {}", e);
            ClientFrame::Input(text.into_bytes())
        }
    }
}

/// Classify an inbound frame.
///
/// Binary frames and text frames that do not decode to a resize message with
/// numeric `cols` and `rows` are input. A resize whose numbers are outside
/// `1..=65535` is dropped.
pub fn classify(message: Message) -> ClientFrame {
    match message {
        Message::Binary(data) => ClientFrame::Input(data),
        Message::Text(text) => classify_text(text),
        Message::Ping(_) | Message::Pong(_) => ClientFrame::Ignored,
        Message::Close(_) => ClientFrame::Close,
    }
}

/// Why the input loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientClosed,
    ClientGone,
    ReadError,
    IdleTimeout,
    ShellEnded,
    ShellWriteFailed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::ClientClosed => "client closed",
            CloseReason::ClientGone => "client disconnected",
            CloseReason::ReadError => "client read error",
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::ShellEnded => "shell ended",
            CloseReason::ShellWriteFailed => "shell write failed",
        };
        f.write_str(text)
    }
}

const GUARD_OPEN: u8 = 0;
const GUARD_CLOSING: u8 = 1;
const GUARD_CLOSED: u8 = 2;

/// One-shot `Open -> Closing -> Closed` guard around `TerminalRegistry::close`.
pub struct CloseGuard {
    registry: Arc<TerminalRegistry>,
    session_id: String,
    state: AtomicU8,
}

impl CloseGuard {
    pub fn new(registry: Arc<TerminalRegistry>, session_id: impl Into<String>) -> Self {
        Self {
            registry,
            session_id: session_id.into(),
            state: AtomicU8::new(GUARD_OPEN),
        }
    }

    /// Close the session unless another caller already did. Returns whether
    /// this call performed the close.
    pub async fn close(&self) -> bool {
        if self
            .state
            .compare_exchange(GUARD_OPEN, GUARD_CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if let Err(e) = self.registry.close(&self.session_id).await {
            debug!(session_id = %self.session_id, "Registry close: {}", e);
        }
        self.state.store(GUARD_CLOSED, Ordering::SeqCst);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == GUARD_CLOSED
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if self.state.load(Ordering::SeqCst) != GUARD_OPEN {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %self.session_id, "No runtime to close abandoned terminal session");
            return;
        };
        let registry = Arc::clone(&self.registry);
        let session_id = std::mem::take(&mut self.session_id);
        runtime.spawn(async move {
            if let Err(e) = registry.close(&session_id).await {
                debug!(session_id = %session_id, "Registry close after abandoned bridge: {}", e);
            }
        });
    }
}

/// Owns the socket sink; ends when every output sender is gone.
async fn write_frames<K>(mut sink: K, mut frames: mpsc::Receiver<Message>, done: CancellationToken)
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = sink.send(frame).await {
            debug!("WebSocket write failed: {}", e);
            done.cancel();
            break;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("WebSocket close failed: {}", e);
    }
}

/// Drain one shell stream: record, then queue as a binary frame.
async fn pump_output(
    session: Arc<TerminalSession>,
    mut source: mpsc::Receiver<Vec<u8>>,
    frames: mpsc::Sender<Message>,
    done: CancellationToken,
    stream: &'static str,
) {
    while let Some(chunk) = source.recv().await {
        session.record_output(&chunk);
        tokio::select! {
            biased;
            sent = frames.send(Message::Binary(chunk)) => {
                if sent.is_err() {
                    break;
                }
            }
            _ = done.cancelled() => break,
        }
    }
    debug!(session_id = %session.id, stream, "Output pump finished");
    done.cancel();
}

/// Per-connection bridge between a WebSocket and a registry session.
pub struct TerminalBridge {
    registry: Arc<TerminalRegistry>,
    options: BridgeOptions,
    state: BridgeState,
}

impl TerminalBridge {
    pub fn new(registry: Arc<TerminalRegistry>, options: BridgeOptions) -> Self {
        Self {
            registry,
            options,
            state: BridgeState::Connecting,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    fn transition(&mut self, next: BridgeState) {
        debug!(from = ?self.state, to = ?next, "Terminal bridge state change");
        self.state = next;
    }

    /// Run the bridge to completion over an upgraded socket. Always ends in
    /// [`BridgeState::Closed`].
    pub async fn run<K, S, E>(
        mut self,
        host_id: u64,
        operator: Operator,
        size: TerminalSize,
        mut sink: K,
        stream: S,
    ) -> BridgeState
    where
        K: Sink<Message> + Unpin + Send + 'static,
        K::Error: fmt::Display,
        S: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: fmt::Display,
    {
        let session = match self.registry.create(host_id, operator, size).await {
            Ok(session) => session,
            Err(e) => {
                warn!(host_id, kind = e.kind(), "Failed to open terminal: {}", e);
                report_creation_failure(&mut sink, &e).await;
                self.transition(BridgeState::Closed);
                return self.state;
            }
        };

        let guard = CloseGuard::new(Arc::clone(&self.registry), session.id.clone());
        let Some(output) = session.take_output() else {
            warn!(session_id = %session.id, "Terminal output already claimed");
            guard.close().await;
            self.transition(BridgeState::Closed);
            return self.state;
        };
        self.transition(BridgeState::Active);

        let done = CancellationToken::new();
        let (frames_tx, frames_rx) = mpsc::channel(self.options.output_queue);
        let mut writer = tokio::spawn(write_frames(sink, frames_rx, done.clone()));
        let stdout_pump = tokio::spawn(pump_output(
            Arc::clone(&session),
            output.stdout,
            frames_tx.clone(),
            done.clone(),
            "stdout",
        ));
        let stderr_pump = tokio::spawn(pump_output(
            Arc::clone(&session),
            output.stderr,
            frames_tx,
            done.clone(),
            "stderr",
        ));

        let reason = self.read_input(&session, stream, &done).await;
        info!(session_id = %session.id, %reason, "Terminal connection closing");
        self.transition(BridgeState::Closing);

        done.cancel();
        session.shutdown().await;
        for pump in [stdout_pump, stderr_pump] {
            if let Err(e) = pump.await {
                warn!(session_id = %session.id, "Output pump failed: {}", e);
            }
        }
        if tokio::time::timeout(self.options.flush_timeout, &mut writer).await.is_err() {
            debug!(session_id = %session.id, "Socket writer did not finish in time, aborting");
            writer.abort();
            let _ = writer.await;
        }

        guard.close().await;
        self.transition(BridgeState::Closed);
        self.state
    }

    async fn read_input<S, E>(
        &self,
        session: &TerminalSession,
        mut stream: S,
        done: &CancellationToken,
    ) -> CloseReason
    where
        S: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: fmt::Display,
    {
        loop {
            let next = tokio::select! {
                _ = done.cancelled() => return CloseReason::ShellEnded,
                next = tokio::time::timeout(self.options.idle_timeout, stream.next()) => next,
            };

            let message = match next {
                Err(_) => return CloseReason::IdleTimeout,
                Ok(None) => return CloseReason::ClientGone,
                Ok(Some(Err(e))) => {
                    debug!(session_id = %session.id, "WebSocket read failed: {}", e);
                    return CloseReason::ReadError;
                }
                Ok(Some(Ok(message))) => message,
            };

            match classify(message) {
                ClientFrame::Input(data) => {
                    let written = tokio::select! {
                        written = session.send_input(&data) => written,
                        _ = done.cancelled() => return CloseReason::ShellEnded,
                    };
                    if let Err(e) = written {
                        warn!(session_id = %session.id, "Failed to write terminal input: {}", e);
                        return CloseReason::ShellWriteFailed;
                    }
                }
                ClientFrame::Resize(size) => {
                    if let Err(e) = session.resize(size).await {
                        warn!(session_id = %session.id, "Failed to resize terminal: {}", e);
                    } else {
                        debug!(session_id = %session.id, cols = size.cols, rows = size.rows, "Terminal resized");
                    }
                }
                ClientFrame::Ignored => {}
                ClientFrame::Close => return CloseReason::ClientClosed,
            }
        }
    }
}

async fn report_creation_failure<K>(sink: &mut K, error: &TerminalError)
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    if let Err(e) = sink.send(Message::Text(creation_failure_text(error))).await {
        debug!("Failed to send creation failure text: {}", e);
        return;
    }
    let close = Message::Close(Some((CloseCode::Error, error.kind().to_string())));
    if let Err(e) = sink.send(close).await {
        debug!("Failed to send close frame: {}", e);
    }
    if let Err(e) = sink.close().await {
        debug!("WebSocket close failed: {}", e);
    }
}
