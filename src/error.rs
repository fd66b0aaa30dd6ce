use std::time::Duration;

use thiserror::Error;

use crate::models::StageStatus;

/// Failure reported by the language-model transport
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model request timed out")]
    Timeout,

    #[error("rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("model API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed model response: {0}")]
    Malformed(String),

    #[error("model unavailable: {0}")]
    Unavailable(String),
}

impl ModelError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited { .. } | Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Malformed(_) | Self::Unavailable(_) => false,
        }
    }

    /// Provider-supplied wait hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Pipeline-level error taxonomy
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient model failure: {0}")]
    TransientModelFailure(#[source] ModelError),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("stage {stage:?} failed: {reason}")]
    StageFailure { stage: StageStatus, reason: String },

    #[error("structural inconsistency: {0}")]
    StructuralInconsistency(String),

    #[error("input error: {0}")]
    InputError(String),

    #[error("invalid stage transition {from:?} -> {to:?}")]
    InvalidTransition { from: StageStatus, to: StageStatus },

    #[error("progress store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<crate::llm::RetryExhausted> for PipelineError {
    fn from(exhausted: crate::llm::RetryExhausted) -> Self {
        match exhausted.last_error {
            ModelError::Malformed(reason) => PipelineError::MalformedResponse(reason),
            other => PipelineError::TransientModelFailure(other),
        }
    }
}

/// Progress store failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ModelError::Timeout.is_transient());
        assert!(ModelError::RateLimited { retry_after: None }.is_transient());
        assert!(ModelError::Api { status: 503, body: String::new() }.is_transient());
        assert!(!ModelError::Api { status: 401, body: String::new() }.is_transient());
        assert!(!ModelError::Malformed("x".to_string()).is_transient());
    }
}
