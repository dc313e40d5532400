//! Session management
//!
//! [`SessionManager`] owns the active credential. It installs credentials
//! handed over by the host's login flow, persists them, restores them at
//! launch, and publishes every change through a `tokio::sync::watch`
//! channel that the sync engine listens on.

use crate::credential_store::CredentialStore;
use crate::error::{AuthError, Result};
use crate::types::Credential;
use bridge_traits::time::Clock;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// Source of the credential the sync engine presents to the server.
pub trait CredentialProvider: Send + Sync {
    /// The usable credential, or `None` when signed out or expired.
    fn current(&self) -> Option<Credential>;

    /// Change notifications. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> watch::Receiver<Option<Credential>>;
}

pub struct SessionManager {
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    sender: watch::Sender<Option<Credential>>,
}

impl SessionManager {
    pub fn new(store: CredentialStore, clock: Arc<dyn Clock>, event_bus: EventBus) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            store,
            clock,
            event_bus,
            sender,
        }
    }

    /// Load the persisted credential at launch.
    ///
    /// An expired credential is deleted and reported as
    /// [`AuthEvent::SessionExpired`] instead of being installed.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<Option<Credential>> {
        let Some(credential) = self.store.load().await? else {
            return Ok(None);
        };

        if credential.is_expired(self.clock.now()) {
            info!(identity_id = %credential.identity_id, "Persisted credential expired");
            self.store.clear().await?;
            self.emit(AuthEvent::SessionExpired {
                identity_id: credential.identity_id.to_string(),
            });
            return Ok(None);
        }

        self.sender.send_replace(Some(credential.clone()));
        self.emit(AuthEvent::SessionRestored {
            identity_id: credential.identity_id.to_string(),
        });
        info!(identity_id = %credential.identity_id, "Session restored");
        Ok(Some(credential))
    }

    /// Install a credential obtained by the host's login flow.
    #[instrument(skip(self, credential), fields(identity_id = %credential.identity_id))]
    pub async fn sign_in(&self, credential: Credential) -> Result<()> {
        if let Some(expired_at) = credential
            .expires_at
            .filter(|_| credential.is_expired(self.clock.now()))
        {
            return Err(AuthError::CredentialExpired {
                identity_id: credential.identity_id.to_string(),
                expired_at,
            });
        }

        if let Err(e) = self.store.save(&credential).await {
            self.emit(AuthEvent::AuthError {
                message: e.to_string(),
                recoverable: true,
            });
            return Err(e);
        }

        let identity_id = credential.identity_id.to_string();
        self.sender.send_replace(Some(credential));
        self.emit(AuthEvent::SignedIn { identity_id });
        Ok(())
    }

    /// Clear the credential. Queued mutations stay in place until the next
    /// sign-in.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        let previous = self.sender.send_replace(None);
        self.store.clear().await?;

        match previous {
            Some(credential) => self.emit(AuthEvent::SignedOut {
                identity_id: credential.identity_id.to_string(),
            }),
            None => warn!("sign_out called without an active session"),
        }
        Ok(())
    }

    fn emit(&self, event: AuthEvent) {
        self.event_bus.emit(CoreEvent::Auth(event)).ok();
    }
}

impl CredentialProvider for SessionManager {
    fn current(&self) -> Option<Credential> {
        let now = self.clock.now();
        let mut expired = None;

        // Expiry is noticed lazily: the first reader past `expires_at`
        // clears the value, which wakes every subscriber.
        self.sender.send_if_modified(|slot| match slot {
            Some(credential) if credential.is_expired(now) => {
                expired = slot.take();
                true
            }
            _ => false,
        });

        if let Some(credential) = expired {
            warn!(identity_id = %credential.identity_id, "Credential expired");
            self.emit(AuthEvent::SessionExpired {
                identity_id: credential.identity_id.to_string(),
            });
            return None;
        }

        self.sender.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.sender.subscribe()
    }
}
