//! The checkpoint store trait

use async_trait::async_trait;

use crate::checkpoint::{Checkpoint, CheckpointRef, PendingWrite};
use crate::error::Result;

/// Durable key-value persistence for orchestration state, keyed by
/// (thread, namespace, checkpoint id).
///
/// Writes from different threads never contend: every checkpoint id is
/// unique per write, so implementations need no locking beyond their native
/// put/insert semantics.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetch one checkpoint. With `checkpoint_id = None`, returns the latest
    /// checkpoint for the thread (ordered by checkpoint_id descending).
    async fn get(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<Checkpoint>>;

    /// Persist a checkpoint, returning its reference.
    async fn put(&self, checkpoint: Checkpoint) -> Result<CheckpointRef>;

    /// List checkpoints for a thread, newest first. `before` is exclusive:
    /// the named checkpoint and everything newer is omitted.
    async fn list(
        &self,
        thread_id: &str,
        namespace: &str,
        before: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>>;

    /// Record writes that occurred between checkpoints.
    async fn put_writes(&self, writes: Vec<PendingWrite>) -> Result<()>;

    /// Fetch the pending writes recorded against one checkpoint, in
    /// (task_id, idx) order.
    async fn get_writes(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<PendingWrite>>;
}
