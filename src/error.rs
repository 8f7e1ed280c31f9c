//! Error types for the playground core

use thiserror::Error;

/// Result type alias for playground operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the playground core
///
/// Script failures inside the isolated context are never surfaced through this
/// type: they travel as `error` console events instead.
#[derive(Error, Debug)]
pub enum Error {
    /// A share token could not be decoded
    #[error("Malformed share token: {0}")]
    Decode(String),

    /// The snapshot store could not be read or written
    #[error("Storage unavailable: {0}")]
    Storage(String),

    /// The execution host failed to start an isolated context
    #[error("Rendering failed: {0}")]
    Render(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error came from the persistence layer
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}
