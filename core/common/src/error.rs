//! Common error types for Enkrypt.

use thiserror::Error;

/// Top-level error type for Enkrypt operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: bad salt/key/container length, empty password, bad key name.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Authentication tag did not verify.
    ///
    /// Raised for tampered or truncated containers and for wrong passwords.
    /// Never retry with the same inputs.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cryptographic primitive rejected its parameters.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation not permitted in the current state.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether retrying the whole operation could succeed.
    ///
    /// Only I/O and storage failures qualify; everything else is caller
    /// misuse or a verification failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Storage(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
