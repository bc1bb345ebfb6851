//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.
//!
//! Note the distinction between this enum and [`crate::envelope::ErrorRecord`]:
//! `Error` is for failures of the hosting process itself (bad config, broken
//! transport, I/O). Handler and wire failures travel as *data* in error
//! records and never unwind through these variants.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the Asya core.
#[derive(Error, Debug)]
pub enum Error {
    /// Envelope or configuration validation errors.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (unknown tool, unknown handler descriptor, ...).
    #[error("not found: {0}")]
    NotFound(String),

    /// Queue transport failures (connect, publish, consume, ack).
    #[error("transport error: {0}")]
    Transport(String),

    /// Object storage failures (bucket, put, get).
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}
