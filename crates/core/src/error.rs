//! Error types for the Concierge CLI.
//!
//! This module defines a unified error enum that covers all error categories
//! in the application, including configuration, I/O, LLM, vector store,
//! retrieval, prompt, and web search errors.

use thiserror::Error;

/// Unified error type for the Concierge CLI.
///
/// All functions in the application return `Result<T, AppError>`.
/// We never panic; errors must be represented and propagated.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LLM provider errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector store backend errors
    #[error("Store error: {0}")]
    Store(String),

    /// Retrieval session errors (fatal orchestrator outcomes)
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Web search provider errors
    #[error("Web search error: {0}")]
    WebSearch(String),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A call exceeded its deadline
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Generic errors
    #[error("{0}")]
    Other(String),
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
        let err = AppError::Store("connection refused".to_string());
        assert_eq!(err.to_string(), "Store error: connection refused");

        let err = AppError::Timeout(1500);
        assert_eq!(err.to_string(), "Timed out after 1500ms");
    }

    #[test]
    fn test_from_serde_json() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
