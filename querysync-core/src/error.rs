//! Error types for querysync operations

use std::time::Duration;
use thiserror::Error;

/// Remote call failures. Recoverable: callers retry via refetch or mutate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Request {operation} timed out after {elapsed:?}")]
    TimedOut { operation: String, elapsed: Duration },

    #[error("Data service unavailable: {reason}")]
    ServiceUnavailable { reason: String },
}

/// Caller-side validation errors, raised before any remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required param missing for {entity_type}: {param}")]
    RequiredParamMissing { entity_type: String, param: String },

    #[error("Invalid value for {param}: {reason}")]
    InvalidParam { param: String, reason: String },

    #[error("Operation {operation} requires a signed-in user")]
    IdentityRequired { operation: String },

    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },
}

/// A write whose preconditions no longer hold. Never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StaleWriteError {
    #[error("Concurrent modification of {entity_type}: {reason}")]
    Conflict { entity_type: String, reason: String },

    #[error("Precondition failed for {entity_type}: {precondition}")]
    PreconditionFailed {
        entity_type: String,
        precondition: String,
    },
}

/// Cache-internal errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Query cache has been torn down")]
    Closed,

    #[error("No async runtime available to drive cache requests")]
    NoRuntime,

    #[error("Failed to decode {entity_type} data: {reason}")]
    Decode { entity_type: String, reason: String },

    #[error("Invalidation rule already declared: {name}")]
    DuplicateRule { name: String },

    #[error("Unknown invalidation rule: {name}")]
    UnknownRule { name: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration from {source_name}: {reason}")]
    Unreadable { source_name: String, reason: String },

    #[error("Failed to initialize logging: {reason}")]
    Telemetry { reason: String },
}

/// Master error type for all querysync errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// The remote call succeeded but no row matched. The fetch path turns
    /// this into `data = null` instead of an error.
    #[error("Not found: {entity_type} ({detail})")]
    NotFound { entity_type: String, detail: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Stale write: {0}")]
    StaleWrite(#[from] StaleWriteError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub fn not_found(entity_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            detail: detail.into(),
        }
    }

    pub fn request_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network(NetworkError::RequestFailed {
            operation: operation.into(),
            reason: reason.into(),
        })
    }

    /// True for errors a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for querysync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// TESTS
// =============================================================================
