//! Error types for the workshop API provider

use bridge_traits::error::BridgeError;
use core_sync::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkshopApiError {
    /// The bearer token was missing, expired or unknown to the server
    #[error("Unauthorized: the server did not accept the bearer token")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Any other non-2xx status
    #[error("Workshop API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// 2xx response carrying `success: false`
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, WorkshopApiError>;

impl WorkshopApiError {
    /// Build from a non-2xx response, keeping at most a short body excerpt.
    pub(crate) fn from_status(status_code: u16, body: &str) -> Self {
        const MAX_MESSAGE: usize = 200;
        let message: String = body.trim().chars().take(MAX_MESSAGE).collect();

        match status_code {
            401 => WorkshopApiError::Unauthorized,
            403 => WorkshopApiError::Forbidden(message),
            _ => WorkshopApiError::ApiError {
                status_code,
                message,
            },
        }
    }
}

impl From<WorkshopApiError> for SyncError {
    fn from(error: WorkshopApiError) -> Self {
        match error {
            WorkshopApiError::ParseError(msg) => SyncError::InvalidPayload(msg),
            WorkshopApiError::Rejected(msg) => SyncError::Rejected(msg),
            WorkshopApiError::BridgeError(e) => SyncError::Transport(e.to_string()),
            other => SyncError::Transport(other.to_string()),
        }
    }
}

impl From<WorkshopApiError> for BridgeError {
    fn from(error: WorkshopApiError) -> Self {
        match error {
            WorkshopApiError::BridgeError(e) => e,
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}
