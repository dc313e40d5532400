//! # Authentication Module
//!
//! Credential handling for the workshop core.
//!
//! Token acquisition is the host's job. This crate receives the resulting
//! [`Credential`], persists it in the platform secure store, restores it at
//! launch, and tells the sync engine whenever it appears, changes, expires
//! or goes away.
//!
//! - [`SessionManager`]: sign-in, sign-out, restore, expiry
//! - [`CredentialProvider`]: the read side the sync engine depends on
//! - [`CredentialStore`]: JSON persistence over `SecureStore`

pub mod credential_store;
pub mod error;
pub mod session;
pub mod types;

pub use credential_store::CredentialStore;
pub use error::{AuthError, Result};
pub use session::{CredentialProvider, SessionManager};
pub use types::{Credential, IdentityId};
