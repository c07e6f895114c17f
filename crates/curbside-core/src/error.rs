use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the Curbside system.
///
/// Variants fall into four families:
/// - configuration (fatal at startup),
/// - collaborator failures from the embedding or generation services
///   (recovered by the caller where a fallback exists),
/// - validation of caller input,
/// - consistency violations of the index and its fingerprint cache
///   (fatal to the operation that hit them).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CurbsideError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding service error: {0}")]
    Embedding(String),

    #[error("Text generation error: {0}")]
    Generation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Duplicate identifier in index: {0}")]
    DuplicateIdentifier(Uuid),

    #[error("Vector index is empty")]
    EmptyIndex,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CurbsideError {
    /// True for failures of an external collaborator (embedding or text generation).
    pub fn is_collaborator(&self) -> bool {
        matches!(self, CurbsideError::Embedding(_) | CurbsideError::Generation(_))
    }

    /// True for index/cache invariant violations.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            CurbsideError::DimensionMismatch { .. }
                | CurbsideError::DuplicateIdentifier(_)
                | CurbsideError::EmptyIndex
        )
    }
}

impl From<toml::de::Error> for CurbsideError {
    fn from(err: toml::de::Error) -> Self {
        CurbsideError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CurbsideError {
    fn from(err: toml::ser::Error) -> Self {
        CurbsideError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CurbsideError {
    fn from(err: serde_json::Error) -> Self {
        CurbsideError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Curbside operations.
pub type Result<T> = std::result::Result<T, CurbsideError>;
