//! Live terminal session registry.
//!
//! `create` either returns a registered session with a running shell or an
//! error with nothing registered. `close` is idempotent: the first caller
//! claims the entry by removing it from the map, so concurrent or repeated
//! calls persist at most one audit record and release the SSH connection at
//! most once. Sessions are never persisted; a restart drops them all.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::terminal::client::ShellConnector;
use crate::terminal::error::TerminalError;
use crate::terminal::recorder::Recorder;
use crate::terminal::shell::{ShellHandle, ShellOutput};
use crate::terminal::types::{
    Operator, SessionStatus, TerminalSessionRecord, TerminalSize,
};

use super::traits::{AuditSink, CredentialVault, HostDirectory};

/// One live terminal: host snapshot, operator, shell and optional recorder.
pub struct TerminalSession {
    pub id: String,
    pub host_id: u64,
    pub host_name: String,
    pub host_ip: String,
    pub operator: Operator,
    pub size: TerminalSize,
    pub created_at: DateTime<Utc>,
    shell: Arc<dyn ShellHandle>,
    output: StdMutex<Option<ShellOutput>>,
    recorder: Option<Arc<Recorder>>,
    started: Instant,
}

impl TerminalSession {
    /// Hand the output streams to the caller that pumps them. Only the first
    /// call gets them.
    pub fn take_output(&self) -> Option<ShellOutput> {
        match self.output.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn has_recorder(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn recording_path(&self) -> Option<&Path> {
        self.recorder.as_deref().map(Recorder::path)
    }

    /// Record `data` as input, then write it to the shell.
    pub async fn send_input(&self, data: &[u8]) -> Result<(), TerminalError> {
        if let Some(recorder) = &self.recorder
            && let Err(e) = recorder.record_input(data)
        {
            debug!(session_id = %self.id, "Input not recorded: {}", e);
        }
        self.shell.write(data).await
    }

    /// Record `data` as output sent to the client.
    pub fn record_output(&self, data: &[u8]) {
        if let Some(recorder) = &self.recorder
            && let Err(e) = recorder.record_output(data)
        {
            debug!(session_id = %self.id, "Output not recorded: {}", e);
        }
    }

    /// Forward a window change to the remote pty. Not recorded.
    pub async fn resize(&self, size: TerminalSize) -> Result<(), TerminalError> {
        self.shell
            .resize(u32::from(size.cols), u32::from(size.rows))
            .await
    }

    /// Force-close the shell and transport so blocked readers return.
    ///
    /// The registry entry stays until `TerminalRegistry::close`.
    pub async fn shutdown(&self) {
        self.shell.close().await;
    }

    async fn finalize_record(&self) -> TerminalSessionRecord {
        let (recording_path, duration_seconds, file_size_bytes, status) = match &self.recorder {
            Some(recorder) => {
                let duration = recorder.duration_secs();
                let recorder = Arc::clone(recorder);
                let finalized = tokio::task::spawn_blocking(move || {
                    let closed = recorder.close();
                    (closed, recorder.file_size())
                })
                .await;
                let file_size = match finalized {
                    Ok((Ok(()), size)) => size,
                    Ok((Err(e), size)) => {
                        warn!(session_id = %self.id, "Failed to finalize recording: {}", e);
                        size
                    }
                    Err(e) => {
                        warn!(session_id = %self.id, "Recording finalizer panicked: {}", e);
                        0
                    }
                };
                (
                    self.recording_path()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    duration,
                    file_size,
                    SessionStatus::Completed,
                )
            }
            None => (
                String::new(),
                self.started.elapsed().as_secs(),
                0,
                SessionStatus::Failed,
            ),
        };

        TerminalSessionRecord {
            host_id: self.host_id,
            host_name: self.host_name.clone(),
            host_ip: self.host_ip.clone(),
            user_id: self.operator.user_id,
            username: self.operator.username.clone(),
            recording_path,
            duration_seconds,
            file_size_bytes,
            status,
        }
    }
}

/// Process-wide table of live terminal sessions.
pub struct TerminalRegistry {
    sessions: DashMap<String, Arc<TerminalSession>>,
    hosts: Arc<dyn HostDirectory>,
    vault: Arc<dyn CredentialVault>,
    connector: Arc<dyn ShellConnector>,
    audit: Arc<dyn AuditSink>,
    recording_dir: PathBuf,
}

fn new_session_id(host_id: u64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host_id, Utc::now().timestamp(), &suffix[..8])
}

impl TerminalRegistry {
    pub fn new(
        hosts: Arc<dyn HostDirectory>,
        vault: Arc<dyn CredentialVault>,
        connector: Arc<dyn ShellConnector>,
        audit: Arc<dyn AuditSink>,
        recording_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            hosts,
            vault,
            connector,
            audit,
            recording_dir: recording_dir.into(),
        }
    }

    /// Open a shell on `host_id` and register it.
    ///
    /// Host lookup, credential checks and the SSH open all happen before
    /// anything is inserted; on error nothing is registered. A recorder that
    /// cannot be created is logged and the session runs unrecorded.
    pub async fn create(
        &self,
        host_id: u64,
        operator: Operator,
        size: TerminalSize,
    ) -> Result<Arc<TerminalSession>, TerminalError> {
        let host = self
            .hosts
            .get_by_id(host_id)
            .await?
            .ok_or(TerminalError::HostNotFound(host_id))?;

        let credential_id = host
            .configured_credential()
            .ok_or(TerminalError::NoCredential(host_id))?;

        let credential = self
            .vault
            .get_decrypted(credential_id)
            .await
            .map_err(|e| match e {
                TerminalError::CredentialUnavailable(_) => e,
                other => TerminalError::CredentialUnavailable(other.to_string()),
            })?;

        let shell = self.connector.open(&host, &credential, size).await?;

        let recording_dir = self.recording_dir.clone();
        let recorder = match tokio::task::spawn_blocking(move || Recorder::create(&recording_dir, size))
            .await
        {
            Ok(Ok(recorder)) => Some(Arc::new(recorder)),
            Ok(Err(e)) => {
                warn!(host_id, "Terminal session will not be recorded: {}", e);
                None
            }
            Err(e) => {
                warn!(host_id, "Recorder setup panicked, session will not be recorded: {}", e);
                None
            }
        };

        let session = Arc::new(TerminalSession {
            id: new_session_id(host_id),
            host_id,
            host_name: host.name,
            host_ip: host.ip,
            operator,
            size,
            created_at: Utc::now(),
            shell: shell.handle,
            output: StdMutex::new(Some(shell.output)),
            recorder,
            started: Instant::now(),
        });

        self.sessions.insert(session.id.clone(), Arc::clone(&session));

        info!(
            session_id = %session.id,
            host_id,
            user_id = session.operator.user_id,
            username = %session.operator.username,
            recording = ?session.recording_path(),
            "Terminal session created"
        );

        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Tear a session down: finalize the recording, persist the audit record,
    /// then close the shell and transport.
    ///
    /// Returns `SessionNotFound` if the session was already closed. Recorder
    /// and audit failures are logged; the SSH connection is released
    /// regardless.
    pub async fn close(&self, session_id: &str) -> Result<(), TerminalError> {
        let (_, session) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| TerminalError::SessionNotFound(session_id.to_string()))?;

        let record = session.finalize_record().await;
        let status = record.status;
        match self.audit.persist(record).await {
            Ok(audit_id) => debug!(session_id, audit_id, "Terminal audit record persisted"),
            Err(e) => error!(session_id, "Failed to persist terminal audit record: {}", e),
        }

        session.shell.close().await;

        info!(session_id, %status, "Terminal session closed");
        Ok(())
    }
}
