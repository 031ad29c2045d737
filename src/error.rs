//! Error types for DEPOT.

use thiserror::Error;

/// Common error type for DEPOT.
#[derive(Error, Debug)]
pub enum DepotError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for client-supplied input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Wire protocol error (malformed frame, unknown operation).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transfer error (incomplete payload, exhausted move retries).
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Operation timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Failure reported by the remote server.
    #[error("server error: {0}")]
    Remote(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for DEPOT operations.
pub type Result<T> = std::result::Result<T, DepotError>;
