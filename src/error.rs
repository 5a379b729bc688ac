//! Crate-wide error types.

use thiserror::Error;

/// Errors surfaced by the engine.
///
/// `DuplicateKey` and `NotFound` are expected query outcomes; `Conflict` is
/// recoverable by retrying the whole transaction; `Corruption` is fatal for
/// the affected file.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("duplicate key")]
    DuplicateKey,

    #[error("key not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the whole transaction can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
