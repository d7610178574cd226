//! Append-only JSONL checkpoint store
//!
//! One file per thread under the store directory; each line is a tagged
//! entry. Reads scan the file, so this is suited to the per-conversation
//! checkpoint volumes the engine produces, not to bulk workloads.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointRef, PendingWrite};
use crate::error::Result;
use crate::store::CheckpointStore;

/// Entry types for the JSONL format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StoreEntry {
    Checkpoint { checkpoint: Checkpoint },
    Write { write: PendingWrite },
}

/// File-backed store writing one JSONL file per thread.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        // Thread ids are caller-chosen; keep the filename safe.
        let safe: String = thread_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.jsonl", safe))
    }

    fn append(&self, thread_id: &str, entry: &StoreEntry) -> Result<()> {
        let path = self.thread_path(thread_id);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", serde_json::to_string(entry)?)?;
        writer.flush()?;
        Ok(())
    }

    fn read_entries(&self, thread_id: &str) -> Result<Vec<StoreEntry>> {
        let path = self.thread_path(thread_id);
        if !path.exists() {
            return Ok(vec![]);
        }
        let file = File::open(&path)?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StoreEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // A torn trailing line from a crashed writer is skipped,
                    // everything before it is still usable.
                    tracing::warn!("Skipping unreadable store entry: {}", e);
                }
            }
        }
        Ok(entries)
    }

    fn checkpoints_for(&self, thread_id: &str, namespace: &str) -> Result<Vec<Checkpoint>> {
        let mut checkpoints: Vec<Checkpoint> = self
            .read_entries(thread_id)?
            .into_iter()
            .filter_map(|e| match e {
                StoreEntry::Checkpoint { checkpoint } if checkpoint.namespace == namespace => {
                    Some(checkpoint)
                }
                _ => None,
            })
            .collect();
        checkpoints.sort_by(|a, b| a.checkpoint_id.cmp(&b.checkpoint_id));
        Ok(checkpoints)
    }

    /// List the thread ids with at least one entry in this store.
    pub fn thread_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                if let Some(stem) = stem_of(&path) {
                    ids.push(stem);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn stem_of(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(String::from)
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints_for(thread_id, namespace)?;
        Ok(match checkpoint_id {
            Some(id) => checkpoints.into_iter().find(|c| c.checkpoint_id == id),
            None => checkpoints.into_iter().next_back(),
        })
    }

    async fn put(&self, checkpoint: Checkpoint) -> Result<CheckpointRef> {
        let reference = checkpoint.as_ref_key();
        let thread_id = checkpoint.thread_id.clone();
        self.append(&thread_id, &StoreEntry::Checkpoint { checkpoint })?;
        Ok(reference)
    }

    async fn list(
        &self,
        thread_id: &str,
        namespace: &str,
        before: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = self.checkpoints_for(thread_id, namespace)?;
        if let Some(before) = before {
            checkpoints.retain(|c| c.checkpoint_id.as_str() < before);
        }
        checkpoints.reverse();
        if let Some(limit) = limit {
            checkpoints.truncate(limit);
        }
        Ok(checkpoints)
    }

    async fn put_writes(&self, writes: Vec<PendingWrite>) -> Result<()> {
        for write in writes {
            let thread_id = write.thread_id.clone();
            self.append(&thread_id, &StoreEntry::Write { write })?;
        }
        Ok(())
    }

    async fn get_writes(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<PendingWrite>> {
        let mut writes: Vec<PendingWrite> = self
            .read_entries(thread_id)?
            .into_iter()
            .filter_map(|e| match e {
                StoreEntry::Write { write }
                    if write.namespace == namespace && write.checkpoint_id == checkpoint_id =>
                {
                    Some(write)
                }
                _ => None,
            })
            .collect();
        writes.sort_by(|a, b| (&a.task_id, a.idx).cmp(&(&b.task_id, b.idx)));
        Ok(writes)
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
    async fn test_put_get_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();

        let checkpoint = cp("thread-1", None, b"snapshot");
        let reference = store.put(checkpoint).await.unwrap();

        let fetched = store
            .get("thread-1", DEFAULT_NAMESPACE, Some(&reference.checkpoint_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.state, b"snapshot");
    }

    #[tokio::test]
    async fn test_latest_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first_id;
        {
            let store = FileCheckpointStore::new(dir.path()).unwrap();
            let a = cp("thread-1", None, b"a");
            first_id = a.checkpoint_id.clone();
            store.put(a).await.unwrap();
            store
                .put(cp("thread-1", Some(first_id.clone()), b"b"))
                .await
                .unwrap();
        }

        let reopened = FileCheckpointStore::new(dir.path()).unwrap();
        let latest = reopened
            .get("thread-1", DEFAULT_NAMESPACE, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.state, b"b");
        assert_eq!(latest.parent_checkpoint_id.as_deref(), Some(first_id.as_str()));
    }

    #[tokio::test]
    async fn test_list_before_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();

        let a = cp("t", None, b"a");
        let b = cp("t", Some(a.checkpoint_id.clone()), b"b");
        store.put(a.clone()).await.unwrap();
        store.put(b.clone()).await.unwrap();

        let older = store
            .list("t", DEFAULT_NAMESPACE, Some(&b.checkpoint_id), None)
            .await
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].checkpoint_id, a.checkpoint_id);
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        store.put(cp("t", None, b"good")).await.unwrap();

        // Simulate a crash mid-append
        let path = dir.path().join("t.jsonl");
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        write!(file, "{{\"type\":\"checkpoint\",\"checkpo").unwrap();

        let latest = store.get("t", DEFAULT_NAMESPACE, None).await.unwrap().unwrap();
        assert_eq!(latest.state, b"good");
    }

    #[tokio::test]
    async fn test_writes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let checkpoint = cp("t", None, b"s");
        let id = checkpoint.checkpoint_id.clone();
        store.put(checkpoint).await.unwrap();

        store
            .put_writes(vec![PendingWrite {
                thread_id: "t".into(),
                namespace: DEFAULT_NAMESPACE.into(),
                checkpoint_id: id.clone(),
                task_id: "task".into(),
                idx: 0,
                channel: "messages".into(),
                value: b"v".to_vec(),
            }])
            .await
            .unwrap();

        let writes = store.get_writes("t", DEFAULT_NAMESPACE, &id).await.unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].channel, "messages");
    }

    #[tokio::test]
    async fn test_thread_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        store.put(cp("alpha", None, b"1")).await.unwrap();
        store.put(cp("beta", None, b"2")).await.unwrap();

        let ids = store.thread_ids().unwrap();
        assert_eq!(ids, vec!["alpha".to_string(), "beta".to_string()]);
    }
}
