//! russh client handler for terminal connections.
//!
//! Terminal connections target hosts from the managed inventory, and the
//! inventory carries no host-key fingerprints. The handler therefore accepts
//! every server key, the equivalent of `StrictHostKeyChecking=no`, and logs
//! the presented fingerprint so it can be audited after the fact.
//!
//! # Security Note
//!
//! Accepting unknown host keys leaves the connection open to
//! man-in-the-middle attacks on untrusted networks. Verifying against stored
//! fingerprints requires the inventory to record them first.

use russh::{client, keys};
use tracing::warn;

/// Client handler for russh that accepts all host keys.
pub struct SshClientHandler {
    target: String,
}

impl SshClientHandler {
    /// Handler for a connection to `target` (`ip:port`, used in logs).
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        warn!(
            target_host = %self.target,
            fingerprint = %server_public_key.fingerprint(keys::HashAlg::Sha256),
            "Accepting unverified SSH host key"
        );
        Ok(true)
    }
}
