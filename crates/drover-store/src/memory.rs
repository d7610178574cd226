//! In-memory checkpoint store
//!
//! Backed by BTreeMaps so "latest" and descending scans fall out of key
//! order, the same shape the external relational engine offers.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::checkpoint::{Checkpoint, CheckpointRef, PendingWrite};
use crate::error::Result;
use crate::store::CheckpointStore;

type CheckpointKey = (String, String, String);
type WriteKey = (String, String, String, String, u32);

/// In-memory store, primarily for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<BTreeMap<CheckpointKey, Checkpoint>>,
    writes: Mutex<BTreeMap<WriteKey, PendingWrite>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints stored across all threads
    pub fn len(&self) -> usize {
        self.checkpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.lock().is_empty()
    }
}

fn key_of(cp: &Checkpoint) -> CheckpointKey {
    (
        cp.thread_id.clone(),
        cp.namespace.clone(),
        cp.checkpoint_id.clone(),
    )
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<Checkpoint>> {
        let map = self.checkpoints.lock();
        match checkpoint_id {
            Some(id) => Ok(map
                .get(&(thread_id.to_string(), namespace.to_string(), id.to_string()))
                .cloned()),
            None => {
                // Latest = last key in the (thread, namespace) range
                let lo = (thread_id.to_string(), namespace.to_string(), String::new());
                let hi = (
                    thread_id.to_string(),
                    namespace.to_string(),
                    "\u{10FFFF}".to_string(),
                );
                Ok(map
                    .range((Bound::Included(lo), Bound::Included(hi)))
                    .next_back()
                    .map(|(_, cp)| cp.clone()))
            }
        }
    }

    async fn put(&self, checkpoint: Checkpoint) -> Result<CheckpointRef> {
        let reference = checkpoint.as_ref_key();
        self.checkpoints.lock().insert(key_of(&checkpoint), checkpoint);
        Ok(reference)
    }

    async fn list(
        &self,
        thread_id: &str,
        namespace: &str,
        before: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>> {
        let map = self.checkpoints.lock();
        let lo = (thread_id.to_string(), namespace.to_string(), String::new());
        let hi = match before {
            // Exclusive upper bound at the named checkpoint
            Some(id) => Bound::Excluded((
                thread_id.to_string(),
                namespace.to_string(),
                id.to_string(),
            )),
            None => Bound::Included((
                thread_id.to_string(),
                namespace.to_string(),
                "\u{10FFFF}".to_string(),
            )),
        };
        let mut out: Vec<Checkpoint> = map
            .range((Bound::Included(lo), hi))
            .rev()
            .map(|(_, cp)| cp.clone())
            .collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn put_writes(&self, writes: Vec<PendingWrite>) -> Result<()> {
        let mut map = self.writes.lock();
        for w in writes {
            let key = (
                w.thread_id.clone(),
                w.namespace.clone(),
                w.checkpoint_id.clone(),
                w.task_id.clone(),
                w.idx,
            );
            map.insert(key, w);
        }
        Ok(())
    }

    async fn get_writes(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<PendingWrite>> {
        let map = self.writes.lock();
        Ok(map
            .values()
            .filter(|w| {
                w.thread_id == thread_id
                    && w.namespace == namespace
                    && w.checkpoint_id == checkpoint_id
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::DEFAULT_NAMESPACE;

    fn cp(thread: &str, parent: Option<String>, state: &[u8]) -> Checkpoint {
        Checkpoint::new(thread, DEFAULT_NAMESPACE, parent, state.to_vec(), vec![])
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let store = MemoryCheckpointStore::new();
        let checkpoint = cp("t1", None, b"hello");
        let reference = store.put(checkpoint.clone()).await.unwrap();

        let fetched = store
            .get("t1", DEFAULT_NAMESPACE, Some(&reference.checkpoint_id))
            .await
            .unwrap()
            .expect("checkpoint should exist");
        assert_eq!(fetched.state, b"hello");
        assert_eq!(fetched.checkpoint_id, checkpoint.checkpoint_id);
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn test_get_latest_without_id() {
        let store = MemoryCheckpointStore::new();
        let first = cp("t1", None, b"one");
        let second = cp("t1", Some(first.checkpoint_id.clone()), b"two");
        store.put(first).await.unwrap();
        store.put(second.clone()).await.unwrap();

        let latest = store
            .get("t1", DEFAULT_NAMESPACE, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.checkpoint_id, second.checkpoint_id);
        assert_eq!(latest.state, b"two");
    }

    #[tokio::test]
    async fn test_get_missing_thread_is_none() {
        let store = MemoryCheckpointStore::new();
        assert!(store.get("nope", DEFAULT_NAMESPACE, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_descending_with_before_exclusive() {
        let store = MemoryCheckpointStore::new();
        let a = cp("t1", None, b"a");
        let b = cp("t1", Some(a.checkpoint_id.clone()), b"b");
        let c = cp("t1", Some(b.checkpoint_id.clone()), b"c");
        store.put(a.clone()).await.unwrap();
        store.put(b.clone()).await.unwrap();
        store.put(c.clone()).await.unwrap();

        let all = store
            .list("t1", DEFAULT_NAMESPACE, None, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].checkpoint_id, c.checkpoint_id);
        assert_eq!(all[2].checkpoint_id, a.checkpoint_id);

        // before = b excludes b and c
        let older = store
            .list("t1", DEFAULT_NAMESPACE, Some(&b.checkpoint_id), None)
            .await
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].checkpoint_id, a.checkpoint_id);
    }

    #[tokio::test]
    async fn test_list_respects_limit() {
        let store = MemoryCheckpointStore::new();
        let mut parent = None;
        for i in 0..5u8 {
            let checkpoint = cp("t1", parent.take(), &[i]);
            parent = Some(checkpoint.checkpoint_id.clone());
            store.put(checkpoint).await.unwrap();
        }

        let two = store
            .list("t1", DEFAULT_NAMESPACE, None, Some(2))
            .await
            .unwrap();
        assert_eq!(two.len(), 2);
        assert!(two[0].checkpoint_id > two[1].checkpoint_id);
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let store = MemoryCheckpointStore::new();
        store.put(cp("t1", None, b"one")).await.unwrap();
        store.put(cp("t2", None, b"two")).await.unwrap();

        let t1 = store
            .list("t1", DEFAULT_NAMESPACE, None, None)
            .await
            .unwrap();
        assert_eq!(t1.len(), 1);
        assert_eq!(t1[0].state, b"one");
    }

    #[tokio::test]
    async fn test_pending_writes_round_trip() {
        let store = MemoryCheckpointStore::new();
        let checkpoint = cp("t1", None, b"s");
        let id = checkpoint.checkpoint_id.clone();
        store.put(checkpoint).await.unwrap();

        store
            .put_writes(vec![
                PendingWrite {
                    thread_id: "t1".into(),
                    namespace: DEFAULT_NAMESPACE.into(),
                    checkpoint_id: id.clone(),
                    task_id: "task-a".into(),
                    idx: 1,
                    channel: "messages".into(),
                    value: b"second".to_vec(),
                },
                PendingWrite {
                    thread_id: "t1".into(),
                    namespace: DEFAULT_NAMESPACE.into(),
                    checkpoint_id: id.clone(),
                    task_id: "task-a".into(),
                    idx: 0,
                    channel: "messages".into(),
                    value: b"first".to_vec(),
                },
            ])
            .await
            .unwrap();

        let writes = store
            .get_writes("t1", DEFAULT_NAMESPACE, &id)
            .await
            .unwrap();
        assert_eq!(writes.len(), 2);
        // (task_id, idx) order from the keyed map
        assert_eq!(writes[0].idx, 0);
        assert_eq!(writes[1].idx, 1);
    }
}
