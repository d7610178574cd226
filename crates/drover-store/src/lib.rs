//! drover-store: durable checkpoint persistence for orchestration state
//!
//! Orchestration runs write a checkpoint after each completed step; each
//! checkpoint chains to its parent, so the history of a thread is a walk
//! back to the root. The storage engine itself is external — this crate
//! defines the [`CheckpointStore`] trait over key-based get/put and ordered
//! scans, plus an in-memory store and an append-only JSONL file store.

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointRef, PendingWrite, DEFAULT_NAMESPACE};
pub use error::{Error, Result};
pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use store::CheckpointStore;
