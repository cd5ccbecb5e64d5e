//! JSON-file inventory used by the server binary.
//!
//! One file provides the three collaborators the terminal needs: host lookup,
//! credential lookup and the terminal capability check.
//!
//! ```json
//! {
//!   "hosts": [{"id": 1, "name": "web-1", "ip": "10.0.0.5", "ssh_user": "root", "credential_id": 1}],
//!   "credentials": [{"id": 1, "type": "password", "password": "secret"}],
//!   "terminal_grants": [{"user_id": 7, "host_ids": [1]}]
//! }
//! ```
//!
//! Credentials are stored in clear text here; encryption at rest belongs to
//! the vault that replaces this file in a full deployment. With no grants at
//! all every operator may open every host. A grant with no `host_ids` covers
//! all hosts.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::terminal::error::TerminalError;
use crate::terminal::storage::{AccessPolicy, CredentialVault, HostDirectory};
use crate::terminal::types::{Credential, Host, Operator};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalGrant {
    pub user_id: u64,
    #[serde(default)]
    pub host_ids: Vec<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    hosts: Vec<Host>,
    #[serde(default)]
    credentials: Vec<Credential>,
    #[serde(default)]
    terminal_grants: Vec<TerminalGrant>,
}

/// Read-only inventory loaded once at startup.
#[derive(Debug, Default)]
pub struct Inventory {
    hosts: HashMap<u64, Host>,
    credentials: HashMap<u64, Credential>,
    grants: Vec<TerminalGrant>,
}

impl Inventory {
    /// Parse inventory JSON.
    pub fn from_json(raw: &str) -> Result<Self, TerminalError> {
        let file: InventoryFile = serde_json::from_str(raw)
            .map_err(|e| TerminalError::Inventory(format!("invalid inventory: {}", e)))?;

        Ok(Self {
            hosts: file.hosts.into_iter().map(|h| (h.id, h)).collect(),
            credentials: file.credentials.into_iter().map(|c| (c.id, c)).collect(),
            grants: file.terminal_grants,
        })
    }

    /// Load the inventory file. A missing file yields an empty inventory.
    pub fn load(path: &Path) -> Result<Self, TerminalError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Inventory {} not found, no hosts are available", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(TerminalError::Inventory(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let inventory = Self::from_json(&raw)?;
        info!(
            hosts = inventory.hosts.len(),
            credentials = inventory.credentials.len(),
            grants = inventory.grants.len(),
            "Inventory loaded from {}",
            path.display()
        );
        Ok(inventory)
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}

#[async_trait]
impl HostDirectory for Inventory {
    async fn get_by_id(&self, host_id: u64) -> Result<Option<Host>, TerminalError> {
        Ok(self.hosts.get(&host_id).cloned())
    }
}

#[async_trait]
impl CredentialVault for Inventory {
    async fn get_decrypted(&self, credential_id: u64) -> Result<Credential, TerminalError> {
        self.credentials.get(&credential_id).cloned().ok_or_else(|| {
            TerminalError::CredentialUnavailable(format!("credential {} not found", credential_id))
        })
    }
}

#[async_trait]
impl AccessPolicy for Inventory {
    async fn allow_terminal(&self, operator: &Operator, host_id: u64) -> bool {
        if self.grants.is_empty() {
            return true;
        }
        self.grants.iter().any(|grant| {
            grant.user_id == operator.user_id
                && (grant.host_ids.is_empty() || grant.host_ids.contains(&host_id))
        })
    }
}
