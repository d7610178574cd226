//! The service boundary: one engine, many independent conversation threads
//!
//! The engine owns an explicit map of active runs (one cancellation
//! controller per thread) instead of any ambient/static registry. At most
//! one run per thread is active at a time; a second request against the
//! same thread is rejected.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use drover_model::{Message, SharedModelClient};
use drover_store::CheckpointStore;

use crate::config::{CheckpointPolicy, RunConfig};
use crate::delegate::SubAgentRegistry;
use crate::error::{Error, Result};
use crate::events::RunEvent;
use crate::executor::ToolRegistry;
use crate::interrupt;
use crate::orchestrator::{CheckpointCursor, Orchestrator, RunOutcome};
use crate::state::{Phase, ThreadState};

/// Orchestration service over a model client, tool and sub-agent
/// registries, and a checkpoint store.
pub struct Engine {
    orchestrator: Orchestrator,
    store: Arc<dyn CheckpointStore>,
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl Engine {
    pub fn new(
        client: SharedModelClient,
        tools: ToolRegistry,
        agents: SubAgentRegistry,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(client, tools, agents),
            store,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to lifecycle events for every run on this engine
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.orchestrator.subscribe()
    }

    /// The checkpoint store backing this engine
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Whether a run is currently active for the thread
    pub fn is_active(&self, thread_id: &str) -> bool {
        self.active.lock().contains_key(thread_id)
    }

    /// Start a run for a thread. Fails with [`Error::RunInProgress`] if the
    /// thread already has an active run.
    pub async fn run(
        &self,
        thread_id: &str,
        transcript: Vec<Message>,
        config: RunConfig,
    ) -> Result<RunOutcome> {
        let cancel = self.register(thread_id)?;
        let result = self.run_registered(thread_id, transcript, &config, cancel).await;
        self.deregister(thread_id);
        result
    }

    async fn run_registered(
        &self,
        thread_id: &str,
        transcript: Vec<Message>,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let cursor = self.cursor_for(thread_id, config).await?;
        let state = ThreadState::with_transcript(transcript);
        self.orchestrator
            .run_from(state, config, cancel, cursor, Phase::Compact)
            .await
    }

    /// Resume a paused thread with an externally supplied reply. The thread
    /// state is restored from its latest checkpoint, the reply is applied to
    /// the pending question, and the loop re-enters the Respond state.
    pub async fn resume(
        &self,
        thread_id: &str,
        reply: &str,
        config: RunConfig,
    ) -> Result<RunOutcome> {
        let cancel = self.register(thread_id)?;
        let result = self.resume_registered(thread_id, reply, &config, cancel).await;
        self.deregister(thread_id);
        result
    }

    async fn resume_registered(
        &self,
        thread_id: &str,
        reply: &str,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let checkpoint = self
            .store
            .get(thread_id, &config.namespace, None)
            .await?
            .ok_or_else(|| Error::ThreadNotFound(thread_id.to_string()))?;
        let mut state: ThreadState = serde_json::from_slice(&checkpoint.state)?;

        let message = interrupt::apply_reply(&mut state, thread_id, reply)?;
        self.orchestrator.emitter().message_finished(&message);

        let cursor = self.cursor_for(thread_id, config).await?;
        self.orchestrator
            .run_from(state, config, cancel, cursor, Phase::Respond)
            .await
    }

    /// Fire the cancellation signal for a thread's active run. Returns
    /// `false` when the thread has no active run.
    pub fn cancel(&self, thread_id: &str) -> bool {
        match self.active.lock().get(thread_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn register(&self, thread_id: &str) -> Result<CancellationToken> {
        let mut active = self.active.lock();
        if active.contains_key(thread_id) {
            return Err(Error::RunInProgress(thread_id.to_string()));
        }
        let token = CancellationToken::new();
        active.insert(thread_id.to_string(), token.clone());
        Ok(token)
    }

    fn deregister(&self, thread_id: &str) {
        self.active.lock().remove(thread_id);
    }

    async fn cursor_for(
        &self,
        thread_id: &str,
        config: &RunConfig,
    ) -> Result<Option<CheckpointCursor>> {
        if config.checkpoint == CheckpointPolicy::Disabled {
            return Ok(None);
        }
        let parent = self
            .store
            .get(thread_id, &config.namespace, None)
            .await?
            .map(|c| c.checkpoint_id);
        Ok(Some(CheckpointCursor::new(
            Arc::clone(&self.store),
            thread_id,
            &config.namespace,
            config.checkpoint,
            parent,
        )))
    }
}
