//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;

use crate::terminal::error::TerminalError;
use crate::terminal::session::SshClientHandler;

/// Trait for SSH authentication strategies.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate with the SSH server.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Credentials rejected by the server
    /// * `Err(_)` - Transport error during the attempt
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TerminalError>;

    /// Strategy name for logging.
    fn name(&self) -> &'static str;
}
