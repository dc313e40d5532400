use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AuthError, Result};

/// Identity that owns units on the workshop server.
///
/// Opaque to the core: it is whatever user id the server issued with the
/// token, and it is compared verbatim against each unit's `userId`.
///
/// # Examples
///
/// ```
/// use core_auth::IdentityId;
///
/// let id = IdentityId::new("user-42").unwrap();
/// assert_eq!(id.to_string(), "user-42");
/// assert!(IdentityId::new("   ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(AuthError::InvalidCredential(
                "identity id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An already-obtained bearer credential.
///
/// How the token was acquired is the host's business; the core only
/// presents it and reacts to its absence or expiry.
///
/// # Security
///
/// The `Debug` implementation redacts the token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub identity_id: IdentityId,
    token: String,
    /// `None` means the token does not expire on its own.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(
        identity_id: IdentityId,
        token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(AuthError::InvalidCredential(
                "token cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            identity_id,
            token,
            expires_at,
        })
    }

    /// The bearer token. Never log this.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identity_id", &self.identity_id)
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_debug_redacts_token() {
        let credential =
            Credential::new(IdentityId::new("user-1").unwrap(), "eyJhbGciOi.secret", None)
                .unwrap();
        let debug = format!("{:?}", credential);

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
        assert!(debug.contains("user-1"));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let id = IdentityId::new("user-1").unwrap();

        let expiring = Credential::new(id.clone(), "t", Some(now)).unwrap();
        assert!(expiring.is_expired(now));
        assert!(!expiring.is_expired(now - Duration::seconds(1)));

        let perpetual = Credential::new(id, "t", None).unwrap();
        assert!(!perpetual.is_expired(now + Duration::days(365)));
    }

    #[test]
    fn test_empty_token_rejected() {
        let result = Credential::new(IdentityId::new("user-1").unwrap(), "", None);
        assert!(matches!(result, Err(AuthError::InvalidCredential(_))));
    }

    #[test]
    fn test_serialized_shape() {
        let credential =
            Credential::new(IdentityId::new("user-1").unwrap(), "tok", None).unwrap();
        let json = serde_json::to_value(&credential).unwrap();

        assert_eq!(json["identityId"], "user-1");
        assert_eq!(json["token"], "tok");
        assert!(json["expiresAt"].is_null());
    }
}
