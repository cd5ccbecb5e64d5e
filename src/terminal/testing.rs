//! In-memory collaborators and a scripted shell for tests.
//!
//! The scripted shell understands two commands, each terminated by `\n`:
//! `echo <text>` answers `<text>\r\n` on stdout and `warn <text>` answers on
//! stderr. `exit` ends both output streams as a remote logout would.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::terminal::client::ShellConnector;
use crate::terminal::error::TerminalError;
use crate::terminal::shell::{ShellHandle, ShellOutput, ShellSession};
use crate::terminal::storage::{AccessPolicy, AuditSink, CredentialVault, HostDirectory};
use crate::terminal::types::{
    Credential, CredentialKind, Host, Operator, TerminalSessionRecord, TerminalSize,
};

pub fn host(id: u64, credential_id: Option<u64>) -> Host {
    Host {
        id,
        name: format!("host-{}", id),
        ip: format!("10.0.0.{}", id),
        port: 22,
        ssh_user: "root".to_string(),
        credential_id,
    }
}

pub fn password_credential(id: u64, password: &str) -> Credential {
    Credential {
        id,
        kind: CredentialKind::Password,
        username: "root".to_string(),
        password: password.to_string(),
        private_key: String::new(),
        passphrase: String::new(),
    }
}

pub struct FakeHosts {
    hosts: DashMap<u64, Host>,
}

impl FakeHosts {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self {
            hosts: hosts.into_iter().map(|h| (h.id, h)).collect(),
        }
    }
}

#[async_trait]
impl HostDirectory for FakeHosts {
    async fn get_by_id(&self, host_id: u64) -> Result<Option<Host>, TerminalError> {
        Ok(self.hosts.get(&host_id).map(|h| h.value().clone()))
    }
}

pub struct FakeVault {
    credentials: DashMap<u64, Credential>,
}

impl FakeVault {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            credentials: credentials.into_iter().map(|c| (c.id, c)).collect(),
        }
    }
}

#[async_trait]
impl CredentialVault for FakeVault {
    async fn get_decrypted(&self, credential_id: u64) -> Result<Credential, TerminalError> {
        self.credentials
            .get(&credential_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| {
                TerminalError::CredentialUnavailable(format!(
                    "credential {} not found",
                    credential_id
                ))
            })
    }
}

/// Audit sink that always fails, counting attempts.
#[derive(Default)]
pub struct FailingAuditSink {
    attempts: AtomicUsize,
}

impl FailingAuditSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn persist(&self, _record: TerminalSessionRecord) -> Result<u64, TerminalError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TerminalError::AuditPersistFailed("database unavailable".to_string()))
    }
}

/// Policy granting terminal access to a fixed set of user ids.
pub struct FakePolicy {
    allowed: Vec<u64>,
}

impl FakePolicy {
    pub fn allowing(allowed: Vec<u64>) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl AccessPolicy for FakePolicy {
    async fn allow_terminal(&self, operator: &Operator, _host_id: u64) -> bool {
        self.allowed.contains(&operator.user_id)
    }
}

type Sender = StdMutex<Option<mpsc::Sender<Vec<u8>>>>;

/// Scripted shell; see module docs.
pub struct FakeShell {
    stdout: Sender,
    stderr: Sender,
    line: StdMutex<Vec<u8>>,
    input: StdMutex<Vec<u8>>,
    resizes: StdMutex<Vec<(u32, u32)>>,
    closed: AtomicBool,
    releases: Arc<AtomicUsize>,
}

impl FakeShell {
    fn new(
        stdout: mpsc::Sender<Vec<u8>>,
        stderr: mpsc::Sender<Vec<u8>>,
        releases: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            stdout: StdMutex::new(Some(stdout)),
            stderr: StdMutex::new(Some(stderr)),
            line: StdMutex::new(Vec::new()),
            input: StdMutex::new(Vec::new()),
            resizes: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            releases,
        }
    }

    /// Everything written to stdin so far.
    pub fn input(&self) -> Vec<u8> {
        self.input.lock().unwrap().clone()
    }

    pub fn resizes(&self) -> Vec<(u32, u32)> {
        self.resizes.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// End both output streams.
    pub fn hang_up(&self) {
        self.stdout.lock().unwrap().take();
        self.stderr.lock().unwrap().take();
    }

    async fn emit(sender: &Sender, data: Vec<u8>) {
        let tx = sender.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(data).await;
        }
    }

    async fn run_line(&self, line: &str) {
        if let Some(text) = line.strip_prefix("echo ") {
            Self::emit(&self.stdout, format!("{}\r\n", text).into_bytes()).await;
        } else if let Some(text) = line.strip_prefix("warn ") {
            Self::emit(&self.stderr, format!("{}\r\n", text).into_bytes()).await;
        } else if line == "exit" {
            self.hang_up();
        }
    }
}

#[async_trait]
impl ShellHandle for FakeShell {
    async fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        if self.is_closed() {
            return Err(TerminalError::ShellIo("shell is closed".to_string()));
        }
        self.input.lock().unwrap().extend_from_slice(data);

        let mut complete = Vec::new();
        {
            let mut line = self.line.lock().unwrap();
            for byte in data {
                if *byte == b'\n' {
                    complete.push(String::from_utf8_lossy(&line).into_owned());
                    line.clear();
                } else {
                    line.push(*byte);
                }
            }
        }
        for line in complete {
            self.run_line(&line).await;
        }
        Ok(())
    }

    async fn resize(&self, cols: u32, rows: u32) -> Result<(), TerminalError> {
        if self.is_closed() {
            return Err(TerminalError::ShellIo("shell is closed".to_string()));
        }
        self.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.hang_up();
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector handing out [`FakeShell`]s.
pub struct FakeConnector {
    failure: Option<String>,
    opened: AtomicUsize,
    releases: Arc<AtomicUsize>,
    shells: StdMutex<Vec<Arc<FakeShell>>>,
    sizes: StdMutex<Vec<TerminalSize>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            failure: None,
            opened: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            shells: StdMutex::new(Vec::new()),
            sizes: StdMutex::new(Vec::new()),
        }
    }

    /// Connector whose every open fails with `ConnectFailed(message)`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of shells whose resources were released.
    pub fn closed(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn last_shell(&self) -> Option<Arc<FakeShell>> {
        self.shells.lock().unwrap().last().cloned()
    }

    pub fn last_size(&self) -> Option<TerminalSize> {
        self.sizes.lock().unwrap().last().copied()
    }
}

#[async_trait]
impl ShellConnector for FakeConnector {
    async fn open(
        &self,
        _host: &Host,
        _credential: &Credential,
        size: TerminalSize,
    ) -> Result<ShellSession, TerminalError> {
        if let Some(message) = &self.failure {
            return Err(TerminalError::ConnectFailed(message.clone()));
        }

        let (stdout_tx, stdout_rx) = mpsc::channel(16);
        let (stderr_tx, stderr_rx) = mpsc::channel(16);
        let shell = Arc::new(FakeShell::new(stdout_tx, stderr_tx, Arc::clone(&self.releases)));

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.shells.lock().unwrap().push(Arc::clone(&shell));
        self.sizes.lock().unwrap().push(size);

        Ok(ShellSession {
            handle: shell,
            output: ShellOutput {
                stdout: stdout_rx,
                stderr: stderr_rx,
            },
        })
    }
}
