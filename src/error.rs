//! Error types for the atelier engine.
//!
//! One enum per §-of-concern is overkill for a single closed-loop engine;
//! instead [`EngineError`] carries the five failure kinds the engine
//! distinguishes, and callers match on kind to decide retry vs. flag vs.
//! backpressure.

use thiserror::Error;

/// Top-level error for all engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input fails schema or taxonomy validation. Local, never retried.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Provider timeout, 5xx, or network blip. Retried with backoff per
    /// policy.
    #[error("transient external error from {provider}: {message}")]
    ExternalTransient { provider: String, message: String },

    /// Quota, auth, or safety-filter rejection. Not retried; surfaced as
    /// a fail-record while sibling tasks proceed.
    #[error("permanent external error from {provider}: {message}")]
    ExternalPermanent { provider: String, message: String },

    /// A logical-consistency rule fired and could not be auto-corrected.
    #[error("consistency error at {field_path}: {message}")]
    Consistency { field_path: String, message: String },

    /// A bounded queue is full. Backpressure to the caller; never dropped
    /// silently.
    #[error("capacity exceeded: {message}")]
    Capacity { message: String },

    /// Requested entity does not exist or is not visible to the caller.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Underlying datastore failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Filesystem or archive failure during ingestion.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Background task was cancelled before completion.
    #[error("operation cancelled: {message}")]
    Cancelled { message: String },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalTransient {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalPermanent {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn consistency(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consistency {
            field_path: field_path.into(),
            message: message.into(),
        }
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::Capacity {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Whether the retry policy may re-attempt the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalTransient { .. })
    }

    /// Message safe to show to end users. Internal detail (SQL, provider
    /// payloads, file paths) stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message } => message.clone(),
            Self::ExternalTransient { .. } => "a provider is temporarily unavailable".into(),
            Self::ExternalPermanent { .. } => "a provider rejected the request".into(),
            Self::Consistency { field_path, .. } => {
                format!("analysis produced an inconsistent result at {field_path}")
            }
            Self::Capacity { .. } => "the system is at capacity, retry shortly".into(),
            Self::NotFound { message } => message.clone(),
            Self::Cancelled { .. } => "the request was cancelled".into(),
            Self::Storage(_) | Self::Serde(_) | Self::Io(_) => "internal error".into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(EngineError::transient("flux", "503").is_retryable());
        assert!(!EngineError::permanent("flux", "quota").is_retryable());
        assert!(!EngineError::validation("bad zip").is_retryable());
        assert!(!EngineError::capacity("queue full").is_retryable());
    }

    #[test]
    fn test_user_message_scrubs_internals() {
        let err = EngineError::transient("flux", "connect ETIMEDOUT 10.0.0.3:443");
        assert!(!err.user_message().contains("10.0.0.3"));

        let err: EngineError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.user_message(), "internal error");
    }
}
