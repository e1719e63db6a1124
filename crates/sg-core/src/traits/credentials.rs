//! Credential persistence trait

use async_trait::async_trait;

use crate::error::PersistenceError;
use sg_protocol::SessionCredentials;

/// Durable storage for session authentication material
///
/// Writes must be durable before the returned future resolves.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load stored credentials, or `None` if nothing has been persisted
    async fn load(&self) -> Result<Option<SessionCredentials>, PersistenceError>;

    /// Replace the stored credentials with `credentials`
    async fn save(&self, credentials: &SessionCredentials) -> Result<(), PersistenceError>;

    /// Erase all stored credentials
    async fn clear(&self) -> Result<(), PersistenceError>;
}
