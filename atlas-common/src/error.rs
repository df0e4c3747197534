//! Common error types for Atlas

use thiserror::Error;

/// Common result type for Atlas operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Atlas services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Change event could not be decoded
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Remote dependency (search index, broker) failed
    #[error("Dependency failure: {0}")]
    Dependency(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

