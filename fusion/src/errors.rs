//! Fusion error types
//!
//! Error taxonomy for the decision pipeline. Only configuration errors are
//! fatal (and only at startup); everything raised during a run is either
//! degraded inside the detector or converted into a fail-closed record by the
//! orchestrator. Cancellation is the one run-level error a caller sees.

use std::time::Duration;
use thiserror::Error;

/// Error category for structured logging and behavior mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Empty or unreadable document text
    InputError,
    /// Classification call timed out, was unavailable, or was rate limited
    ExternalServiceError,
    /// Classification response was malformed or out of range
    ValidationError,
    /// Missing or invalid pattern/category definitions
    ConfigurationError,
    /// Run aborted through its cancellation token
    Cancelled,
    /// Unexpected logic bugs
    InternalError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputError => "INPUT_ERROR",
            Self::ExternalServiceError => "EXTERNAL_SERVICE_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Fusion error with category and context
#[derive(Debug, Error)]
pub enum FusionError {
    #[error("input error: {message}")]
    Input { message: String },

    #[error("external service error: {message}")]
    ExternalService {
        message: String,
        #[source]
        source: Option<ClassificationError>,
    },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl FusionError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Input { .. } => ErrorCategory::InputError,
            Self::ExternalService { .. } => ErrorCategory::ExternalServiceError,
            Self::Validation { .. } => ErrorCategory::ValidationError,
            Self::Configuration { .. } => ErrorCategory::ConfigurationError,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Internal { .. } => ErrorCategory::InternalError,
        }
    }

    /// Create an input error
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    /// Create an external service error
    pub fn external(message: impl Into<String>) -> Self {
        Self::ExternalService {
            message: message.into(),
            source: None,
        }
    }

    /// Create an external service error wrapping the last adapter error
    pub fn external_with_source(message: impl Into<String>, source: ClassificationError) -> Self {
        Self::ExternalService {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for fusion operations
pub type Result<T> = std::result::Result<T, FusionError>;

// ─────────────────────────────────────────────────────────────────────────────
// Adapter errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure reported by a classification adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    #[error("classification call timed out after {0:?}")]
    Timeout(Duration),

    #[error("classification service unavailable: {0}")]
    Unavailable(String),

    #[error("classification rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("malformed classification output: {0}")]
    Malformed(String),
}

impl ClassificationError {
    /// Transient failures are retried with backoff; malformed output is not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }

    /// Server-suggested delay before the next attempt, if any.
    pub fn suggested_backoff(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            Self::Timeout(_) | Self::Unavailable(_) | Self::Malformed(_) => None,
        }
    }
}
