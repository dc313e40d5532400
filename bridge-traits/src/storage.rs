//! Secure Storage Abstraction

use async_trait::async_trait;

use crate::error::Result;

/// Secure credential storage trait
///
/// Backed by the platform keychain:
/// - macOS/iOS: Keychain Services
/// - Android: Keystore
/// - Windows: Credential Manager
/// - Linux: Secret Service
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn store_credential(store: &dyn SecureStore, payload: &str) -> Result<()> {
///     store.set_secret("workshop.credential", payload.as_bytes()).await
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing any previous value under `key`.
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// Returns `Ok(None)` if the key doesn't exist. Returned data must not be
    /// logged.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret. Deleting a missing key succeeds.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }
}
