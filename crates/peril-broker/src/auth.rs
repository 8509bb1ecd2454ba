//! Authentication hook for broker connections.
//!
//! Every connection opens with a `Hello` frame carrying a username and
//! password. The broker hands those to an [`Authenticator`] before it
//! answers `Welcome`. Swap the implementation to plug in a real user
//! store; [`StaticCredentials`] covers the single shared login the game
//! uses out of the box (`guest`/`guest`).

use std::collections::HashMap;

use crate::BrokerError;

/// Validates the credentials a client presents in its handshake.
///
/// # Trait bounds
///
/// - `Send + Sync` → shared by every connection task.
/// - `'static` → lives as long as the server.
pub trait Authenticator: Send + Sync + 'static {
    /// Returns `Ok(())` if the credentials are accepted.
    ///
    /// # Returns
    /// - `Ok(())` → the connection may proceed
    /// - `Err(BrokerError::AuthFailed)` → the broker answers `Refused`
    ///   and closes the socket
    fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<(), BrokerError>> + Send;
}

/// An in-memory username → password table.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    /// Creates a table with a single user.
    pub fn single(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::default().with_user(username, password)
    }

    /// Adds (or replaces) a user.
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl Authenticator for StaticCredentials {
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), BrokerError> {
        match self.users.get(username) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(BrokerError::AuthFailed(format!(
                "login refused for user '{username}'"
            ))),
        }
    }
}
