//! Error taxonomy for the terminal bridge.
//!
//! Errors fall into two groups:
//!
//! 1. **Creation-time errors** abort `TerminalRegistry::create` before anything
//!    is registered and are reported to the client over the upgraded socket:
//!    [`HostNotFound`], [`NoCredential`], [`CredentialUnavailable`],
//!    [`InvalidCredential`], [`ConnectFailed`].
//!
//! 2. **Teardown and runtime errors** are logged and tolerated:
//!    [`RecorderUnavailable`], [`AuditPersistFailed`], [`SessionNotFound`],
//!    [`ShellIo`]. None of them prevents the SSH resources from being released.
//!
//! [`Inventory`] is only raised while the server starts.
//!
//! Nothing in this subsystem is retried.
//!
//! [`HostNotFound`]: TerminalError::HostNotFound
//! [`NoCredential`]: TerminalError::NoCredential
//! [`CredentialUnavailable`]: TerminalError::CredentialUnavailable
//! [`InvalidCredential`]: TerminalError::InvalidCredential
//! [`ConnectFailed`]: TerminalError::ConnectFailed
//! [`RecorderUnavailable`]: TerminalError::RecorderUnavailable
//! [`AuditPersistFailed`]: TerminalError::AuditPersistFailed
//! [`SessionNotFound`]: TerminalError::SessionNotFound
//! [`ShellIo`]: TerminalError::ShellIo
//! [`Inventory`]: TerminalError::Inventory

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("host {0} not found")]
    HostNotFound(u64),

    #[error("host {0} has no credential configured")]
    NoCredential(u64),

    #[error("failed to load credential: {0}")]
    CredentialUnavailable(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("SSH connection failed: {0}")]
    ConnectFailed(String),

    #[error("recorder unavailable: {0}")]
    RecorderUnavailable(String),

    #[error("failed to persist terminal audit record: {0}")]
    AuditPersistFailed(String),

    #[error("terminal session {0} not found")]
    SessionNotFound(String),

    #[error("shell I/O failed: {0}")]
    ShellIo(String),

    #[error("inventory unavailable: {0}")]
    Inventory(String),
}

impl TerminalError {
    /// Stable machine-readable code, used as the WebSocket close reason.
    pub fn kind(&self) -> &'static str {
        match self {
            TerminalError::HostNotFound(_) => "host_not_found",
            TerminalError::NoCredential(_) => "no_credential",
            TerminalError::CredentialUnavailable(_) => "credential_unavailable",
            TerminalError::InvalidCredential(_) => "invalid_credential",
            TerminalError::ConnectFailed(_) => "connect_failed",
            TerminalError::RecorderUnavailable(_) => "recorder_unavailable",
            TerminalError::AuditPersistFailed(_) => "audit_persist_failed",
            TerminalError::SessionNotFound(_) => "session_not_found",
            TerminalError::ShellIo(_) => "shell_io",
            TerminalError::Inventory(_) => "inventory",
        }
    }
}
