//! Error types for kbvault.
//!
//! One error enum covers every failure category: configuration, I/O,
//! index construction, embedding, lookups and serialization.

use thiserror::Error;

/// Unified error type for kbvault.
///
/// All fallible functions return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A vector store could not be built or restored for a pool key.
    ///
    /// Raised when a persisted snapshot exists but cannot be read, or when
    /// the embedding provider cannot produce usable vectors at load time.
    #[error("Index construction error: {0}")]
    Construction(String),

    /// Embedding computation failed for one or more texts.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A referenced key, knowledge base or record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Vector store and document catalog errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Returns true for [`AppError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::Construction("snapshot truncated".to_string());
        assert_eq!(
            err.to_string(),
            "Index construction error: snapshot truncated"
        );

        let err = AppError::NotFound("samples/trigram_v1".to_string());
        assert!(err.is_not_found());
        assert!(!AppError::Other("x".to_string()).is_not_found());
    }

    #[test]
    fn test_from_serde_json() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: AppError = parse.unwrap_err().into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
