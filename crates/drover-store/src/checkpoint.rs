//! Checkpoint and pending-write row types

use serde::{Deserialize, Serialize};

/// Namespace used when a caller does not partition checkpoints further.
pub const DEFAULT_NAMESPACE: &str = "";

/// A durable snapshot of orchestration state at one step.
///
/// Checkpoint ids are time-ordered (UUID v7), so for a given
/// (thread_id, namespace) the latest checkpoint is the one with the largest
/// id and descending scans need no separate sort column. Ids chain to their
/// parent back to a root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub namespace: String,
    pub checkpoint_id: String,
    pub parent_checkpoint_id: Option<String>,
    /// Serialized orchestration state, opaque to the store
    pub state: Vec<u8>,
    /// Serialized metadata, opaque to the store
    pub metadata: Vec<u8>,
    pub created_at: i64,
}

impl Checkpoint {
    /// Create a new checkpoint with a freshly generated time-ordered id.
    pub fn new(
        thread_id: impl Into<String>,
        namespace: impl Into<String>,
        parent_checkpoint_id: Option<String>,
        state: Vec<u8>,
        metadata: Vec<u8>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            namespace: namespace.into(),
            checkpoint_id: uuid::Uuid::now_v7().to_string(),
            parent_checkpoint_id,
            state,
            metadata,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// The reference for this checkpoint
    pub fn as_ref_key(&self) -> CheckpointRef {
        CheckpointRef {
            thread_id: self.thread_id.clone(),
            namespace: self.namespace.clone(),
            checkpoint_id: self.checkpoint_id.clone(),
        }
    }
}

/// Identifies one stored checkpoint; returned by `put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub thread_id: String,
    pub namespace: String,
    pub checkpoint_id: String,
}

/// A write that occurred between checkpoints.
///
/// The schema is persisted so resume granularity can later become
/// per-write; the engine currently restores per-checkpoint only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWrite {
    pub thread_id: String,
    pub namespace: String,
    pub checkpoint_id: String,
    pub task_id: String,
    pub idx: u32,
    pub channel: String,
    /// Serialized value, opaque to the store
    pub value: Vec<u8>,
}
