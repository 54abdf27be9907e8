//! Common error type shared by the daemon and API clients.

/// Errors produced by domain-type validation and (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A domain value failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, Error>;
