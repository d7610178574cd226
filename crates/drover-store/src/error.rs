//! Error types for drover-store

use thiserror::Error;

/// Result type alias using drover-store Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during checkpoint persistence
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Row serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A referenced checkpoint does not exist
    #[error("Checkpoint not found: {0}")]
    NotFound(String),
}
