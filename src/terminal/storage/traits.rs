//! Collaborator interfaces consumed by the terminal subsystem.
//!
//! Host inventory, credential decryption, audit persistence and capability
//! checks live elsewhere; these traits are the fixed seams. All of them must
//! be thread-safe (`Send + Sync`) since one instance serves every session.

use async_trait::async_trait;

use crate::terminal::error::TerminalError;
use crate::terminal::types::{
    AuditQuery, Credential, Host, Operator, StoredSessionRecord, TerminalSessionRecord,
};

/// Host lookup by id.
#[async_trait]
pub trait HostDirectory: Send + Sync {
    /// `Ok(None)` when no such host exists.
    async fn get_by_id(&self, host_id: u64) -> Result<Option<Host>, TerminalError>;
}

/// Returns decrypted credentials.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn get_decrypted(&self, credential_id: u64) -> Result<Credential, TerminalError>;
}

/// Write side of the terminal audit log: one record per closed session.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist a record and return its id.
    async fn persist(&self, record: TerminalSessionRecord) -> Result<u64, TerminalError>;
}

/// Queryable audit log backing the audit endpoints.
#[async_trait]
pub trait AuditStore: AuditSink {
    /// Matching records newest first, paginated, plus the total match count.
    async fn list(
        &self,
        query: &AuditQuery,
    ) -> Result<(usize, Vec<StoredSessionRecord>), TerminalError>;

    async fn get(&self, id: u64) -> Result<Option<StoredSessionRecord>, TerminalError>;

    /// Remove a record. Returns the removed record, `None` if it did not exist.
    async fn delete(&self, id: u64) -> Result<Option<StoredSessionRecord>, TerminalError>;
}

/// "terminal" capability check.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn allow_terminal(&self, operator: &Operator, host_id: u64) -> bool;
}
