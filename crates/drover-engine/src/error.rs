//! Error types for drover-engine

use thiserror::Error;

/// Result type alias using drover-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during orchestration
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model-client layer
    #[error(transparent)]
    Model(#[from] drover_model::Error),

    /// An error from the checkpoint store
    #[error("Checkpoint store error: {0}")]
    Store(#[from] drover_store::Error),

    /// Orchestration state failed to (de)serialize
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A second run was requested against a thread with an active run
    #[error("A run is already active for thread '{0}'")]
    RunInProgress(String),

    /// No checkpoint exists for the thread
    #[error("No checkpoint found for thread '{0}'")]
    ThreadNotFound(String),

    /// Resume was called on a thread that is not paused
    #[error("Thread '{0}' has no pending question to resume")]
    NoPendingQuestion(String),

    /// An error during compaction (string-based for flexibility)
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// A generic engine error
    #[error("{0}")]
    Other(String),
}
