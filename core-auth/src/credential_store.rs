//! Secure Credential Storage
//!
//! Persists the active [`Credential`] through the host [`SecureStore`] so a
//! session survives restarts.
//!
//! - The credential is stored as JSON under a single key.
//! - Token values are never logged.
//! - Unreadable entries are deleted instead of failing every launch.

use crate::error::{AuthError, Result};
use crate::types::Credential;
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CREDENTIAL_KEY: &str = "workshop.credential";

/// Secure storage for the active credential
#[derive(Clone)]
pub struct CredentialStore {
    secure_store: Arc<dyn SecureStore>,
}

impl CredentialStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        Self { secure_store }
    }

    /// Persist the credential, replacing any previous one.
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_vec(credential).map_err(|e| AuthError::SerializationFailed {
            context: "credential".to_string(),
            source: e,
        })?;

        self.secure_store
            .set_secret(CREDENTIAL_KEY, &json)
            .await
            .map_err(|e| {
                warn!(
                    identity_id = %credential.identity_id,
                    error = %e,
                    "Failed to store credential in secure storage"
                );
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(
            identity_id = %credential.identity_id,
            expires_at = ?credential.expires_at,
            "Credential stored securely"
        );

        Ok(())
    }

    /// Load the persisted credential.
    ///
    /// Returns `Ok(None)` when nothing is stored or the stored bytes could
    /// not be decoded (the corrupted entry is removed).
    pub async fn load(&self) -> Result<Option<Credential>> {
        let bytes = self
            .secure_store
            .get_secret(CREDENTIAL_KEY)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;

        let Some(bytes) = bytes else {
            debug!("No persisted credential");
            return Ok(None);
        };

        match serde_json::from_slice::<Credential>(&bytes) {
            Ok(credential) => {
                debug!(identity_id = %credential.identity_id, "Loaded persisted credential");
                Ok(Some(credential))
            }
            Err(e) => {
                warn!(error = %e, "Persisted credential is corrupted, deleting it");
                if let Err(delete_err) = self.secure_store.delete_secret(CREDENTIAL_KEY).await {
                    warn!(error = %delete_err, "Failed to delete corrupted credential");
                }
                Ok(None)
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.secure_store
            .delete_secret(CREDENTIAL_KEY)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;
        info!("Credential removed from secure storage");
        Ok(())
    }
}
