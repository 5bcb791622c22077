// Error types for the commentary pipeline

use thiserror::Error;

use crate::event::SourceCategory;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, CastlineError>;

/// Errors that can occur while building a commentary timeline
#[derive(Debug, Error)]
pub enum CastlineError {
    /// Invalid configuration, fatal before any generation starts
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A raw event provider could not produce data
    #[error("Source {category} unavailable: {reason}")]
    SourceUnavailable {
        category: SourceCategory,
        reason: String,
    },

    /// Text generation collaborator error
    #[error("LLM error: {0}")]
    Llm(String),

    /// A generation call exceeded its deadline
    #[error("Generation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Generation cache error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown was requested before every source finished generation
    #[error("Run cancelled before scheduling; generated narration is cached")]
    Cancelled,

    /// Encoding or decoding error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CastlineError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        CastlineError::Configuration(msg.into())
    }

    /// Create a source unavailable error
    pub fn source_unavailable(category: SourceCategory, reason: impl Into<String>) -> Self {
        CastlineError::SourceUnavailable {
            category,
            reason: reason.into(),
        }
    }

    /// Create an LLM error
    pub fn llm(msg: impl Into<String>) -> Self {
        CastlineError::Llm(msg.into())
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        CastlineError::Cache(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        CastlineError::Serialization(msg.into())
    }

    /// Whether retrying the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, CastlineError::Llm(_) | CastlineError::Timeout(_))
    }
}

impl From<serde_json::Error> for CastlineError {
    fn from(err: serde_json::Error) -> Self {
        CastlineError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for CastlineError {
    fn from(err: csv::Error) -> Self {
        CastlineError::Serialization(err.to_string())
    }
}
