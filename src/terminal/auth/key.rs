//! Private key SSH authentication.
//!
//! Keys come from the credential vault as PEM/OpenSSH text and never touch
//! the filesystem.

use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::terminal::error::TerminalError;
use crate::terminal::session::SshClientHandler;

use super::traits::AuthStrategy;

/// Public key authentication with an already decoded private key.
pub struct KeyAuth {
    key: Arc<keys::PrivateKey>,
}

impl KeyAuth {
    /// Decode key material, decrypting it with `passphrase` when given.
    pub fn from_pem(pem: &str, passphrase: Option<&str>) -> Result<Self, TerminalError> {
        if pem.trim().is_empty() {
            return Err(TerminalError::InvalidCredential(
                "private key is empty".to_string(),
            ));
        }

        let key = keys::decode_secret_key(pem, passphrase).map_err(|e| {
            TerminalError::InvalidCredential(format!("failed to parse private key: {}", e))
        })?;

        Ok(Self { key: Arc::new(key) })
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TerminalError> {
        // For RSA keys, use the best supported hash algorithm
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::clone(&self.key), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| TerminalError::ConnectFailed(format!("key authentication: {}", e)))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
