//! Authentication strategies for terminal SSH connections.
//!
//! Each stored credential maps to exactly one strategy:
//!
//! - [`PasswordAuth`]: password login
//! - [`KeyAuth`]: in-memory private key, optionally passphrase protected
//!
//! [`auth_for`] performs the mapping and parses key material up front, so a
//! malformed key is reported before any network traffic happens.

mod key;
mod password;
mod traits;

pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;

use crate::terminal::error::TerminalError;
use crate::terminal::types::{Credential, CredentialKind};

/// Select the authentication strategy for a decrypted credential.
pub fn auth_for(credential: &Credential) -> Result<Box<dyn AuthStrategy>, TerminalError> {
    match credential.kind {
        CredentialKind::Password => Ok(Box::new(PasswordAuth::new(credential.password.clone()))),
        CredentialKind::Key => {
            let auth = KeyAuth::from_pem(&credential.private_key, credential.key_passphrase())?;
            Ok(Box::new(auth))
        }
    }
}
