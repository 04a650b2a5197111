//! Error types for regulens.

use thiserror::Error;

/// Result type alias using regulens' Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for regulens operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(uuid::Uuid),

    /// Regulation not found
    #[error("Regulation not found: {0}")]
    RegulationNotFound(uuid::Uuid),

    /// Embedding generation or validation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// External AI extraction/generation failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Blob storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Job runner error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Outbound call exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Row exists but belongs to a different organization
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
