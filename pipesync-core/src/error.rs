//! Error types for pipesync

use thiserror::Error;

/// Result type alias for reconciliation operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the reconciliation core
#[derive(Debug, Error)]
pub enum SyncError {
    /// An expected target (config, job, run) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The engine object graph does not match what the operation assumes
    #[error("Structural mismatch: {0}")]
    Structural(String),

    /// A create/update reported success but the object is not retrievable
    #[error("Projection failed: {0}")]
    Projection(String),

    /// The PipelineConfig could not be turned into a job definition
    #[error("Translation failed: {0}")]
    Translation(String),

    /// A Pipeline or resource key does not follow the naming convention
    #[error("Malformed name: '{0}'")]
    NameFormat(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SyncError {
    /// Whether requeueing the reconcile may succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Projection(_) | Self::Engine(_) | Self::Api(_) | Self::NotFound(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Engine(e) => e.is_not_found(),
            Self::Api(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Short reason used in status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::Structural(_) => "StructuralError",
            Self::Projection(_) => "ProjectionError",
            Self::Translation(_) => "TranslationError",
            Self::NameFormat(_) => "NameFormatError",
            Self::Engine(_) => "EngineError",
            Self::Api(_) => "ApiError",
        }
    }
}

/// Errors that can occur when talking to the execution engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Request could not be sent or completed
    #[error("Engine request failed: {0}")]
    RequestFailed(String),

    /// Engine returned an error status code
    #[error("Engine error (status {status}): {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Error message from the engine
        message: String,
    },

    /// Failed to parse an engine response
    #[error("Failed to parse engine response: {0}")]
    ParseError(String),

    /// Item not found
    #[error("Engine item not found: {0}")]
    NotFound(String),

    /// The engine refused the operation (e.g. parent is not a folder)
    #[error("Engine rejected operation: {0}")]
    Rejected(String),
}

impl EngineError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::Status { status: 404, .. })
    }
}

/// Errors that can occur when talking to the control plane
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Control plane request failed: {0}")]
    RequestFailed(String),

    #[error("Control plane error (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("Failed to parse control plane response: {0}")]
    ParseError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::Status { status: 404, .. })
    }

    /// Check if this error is a conflict (stale resourceVersion on patch)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Status { status: 409, .. })
    }
}
