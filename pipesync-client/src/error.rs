//! Error types for the pipesync REST clients

use pipesync_core::{ApiError, EngineError};
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to a remote API
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }
}

impl From<ClientError> for EngineError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::RequestFailed(e) => EngineError::RequestFailed(e.to_string()),
            ClientError::ApiError { status, message } => EngineError::Status { status, message },
            ClientError::ParseError(message) => EngineError::ParseError(message),
            ClientError::NotFound(what) => EngineError::NotFound(what),
            ClientError::InvalidRequest(message) => EngineError::Rejected(message),
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::RequestFailed(e) => ApiError::RequestFailed(e.to_string()),
            ClientError::ApiError { status, message } => ApiError::Status { status, message },
            ClientError::ParseError(message) => ApiError::ParseError(message),
            ClientError::NotFound(what) => ApiError::NotFound(what),
            ClientError::InvalidRequest(message) => ApiError::status(400, message),
        }
    }
}
