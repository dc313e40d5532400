use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// A sync was explicitly requested but no usable credential is present.
    #[error("No credential available; sign in before syncing")]
    NotAuthenticated,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server rejected the request: {0}")]
    Rejected(String),

    #[error("Malformed server payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid timestamp in field {field}: {value}")]
    InvalidTimestamp { field: String, value: String },

    #[error("Invalid sync configuration: {0}")]
    Config(String),

    #[error("Local store error: {0}")]
    Library(#[from] LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// The engine stopped before the requested round-trip reported back.
    #[error("Sync engine shut down before the round-trip finished")]
    Interrupted,
}

impl SyncError {
    /// Whether the same request may succeed later without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) => true,
            SyncError::Bridge(e) => e.is_transient(),
            SyncError::Library(LibraryError::Database(_)) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
