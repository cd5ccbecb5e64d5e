//! Password-based SSH authentication.

use async_trait::async_trait;
use russh::client;

use crate::terminal::error::TerminalError;
use crate::terminal::session::SshClientHandler;

use super::traits::AuthStrategy;

/// Password authentication strategy.
pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TerminalError> {
        let result = handle
            .authenticate_password(username, &self.password)
            .await
            .map_err(|e| TerminalError::ConnectFailed(format!("password authentication: {}", e)))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_auth_name() {
        let auth = PasswordAuth::new("secret");
        assert_eq!(auth.name(), "password");
    }

    #[test]
    fn test_password_auth_keeps_password() {
        let auth = PasswordAuth::new(String::from("p@ss word"));
        assert_eq!(auth.password, "p@ss word");
    }
}
