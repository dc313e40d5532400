use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Failed to serialize {context}: {source}")]
    SerializationFailed {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Credential for {identity_id} expired at {expired_at}")]
    CredentialExpired {
        identity_id: String,
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("Not authenticated")]
    NotAuthenticated,
}

pub type Result<T> = std::result::Result<T, AuthError>;
