//! In-memory audit store.
//!
//! Records live for the lifetime of the process. Ids are allocated from an
//! atomic counter starting at 1.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::terminal::error::TerminalError;
use crate::terminal::types::{AuditQuery, StoredSessionRecord, TerminalSessionRecord};

use super::traits::{AuditSink, AuditStore};

/// Page used when the query asks for page 0.
pub const DEFAULT_PAGE: usize = 1;

/// Page size used when the query asks for 0 rows.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// `DashMap`-based implementation of `AuditStore`.
pub struct MemoryAuditStore {
    records: DashMap<u64, StoredSessionRecord>,
    next_id: AtomicU64,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record, oldest first.
    pub fn records(&self) -> Vec<StoredSessionRecord> {
        let mut records: Vec<_> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_keyword(record: &TerminalSessionRecord, keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    [&record.host_name, &record.host_ip, &record.username]
        .iter()
        .any(|field| field.to_lowercase().contains(&keyword))
}

#[async_trait]
impl AuditSink for MemoryAuditStore {
    async fn persist(&self, record: TerminalSessionRecord) -> Result<u64, TerminalError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.insert(
            id,
            StoredSessionRecord {
                id,
                created_at: Utc::now(),
                record,
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn list(
        &self,
        query: &AuditQuery,
    ) -> Result<(usize, Vec<StoredSessionRecord>), TerminalError> {
        let keyword = query
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        let mut matching: Vec<StoredSessionRecord> = self
            .records
            .iter()
            .filter(|entry| keyword.is_none_or(|k| matches_keyword(&entry.record, k)))
            .map(|entry| entry.value().clone())
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let page = if query.page == 0 { DEFAULT_PAGE } else { query.page };
        let page_size = if query.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            query.page_size
        };

        let total = matching.len();
        let list = matching
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok((total, list))
    }

    async fn get(&self, id: u64) -> Result<Option<StoredSessionRecord>, TerminalError> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: u64) -> Result<Option<StoredSessionRecord>, TerminalError> {
        Ok(self.records.remove(&id).map(|(_, record)| record))
    }
}
