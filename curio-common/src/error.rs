//! Common error types for Curio
//!
//! Distinguishes transient transport failures (absorbed by the sync
//! queue) from conditions that require user action (reconnect, backoff)
//! or developer action (data-integrity violations).

use thiserror::Error;

/// Common result type for Curio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Curio crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Stored data violates an invariant (e.g. more than one open
    /// movement entry, a stage chain looping back on itself).
    /// Surfaced, never silently repaired.
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    /// Transient network failure; safe to retry via the sync queue
    #[error("Network error: {0}")]
    Network(String),

    /// Remote service rejected the request with a domain error code
    #[error("Remote service error {code}: {message}")]
    Remote { code: u32, message: String },

    /// Remote service asked for backoff
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Stored credential is expired or revoked and refresh failed;
    /// the user must reconnect the account. Not retried automatically.
    #[error("Reconnect required: {0}")]
    ReconnectRequired(String),

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error already delivered to a concurrent caller of the same
    /// deduplicated request
    #[error(transparent)]
    Shared(#[from] std::sync::Arc<Error>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures the sync queue should keep retrying.
    ///
    /// Dead credentials and domain rejections are excluded: retrying
    /// them cannot succeed without user or developer action.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::RateLimited(_) => true,
            Error::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }
}
