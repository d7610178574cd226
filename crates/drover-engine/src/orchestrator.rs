//! The orchestration loop
//!
//! The loop interprets [`Phase`] values, performs the effects of each phase
//! (compaction check, model call, tool execution, delegation, pause), and
//! lets the pure transition function in [`crate::state`] decide where
//! control goes next. Every transcript mutation is reported through the
//! lifecycle emitter, and completed steps are written to the checkpoint
//! store according to the configured policy.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use drover_model::{
    Message, MessageBuilder, MessageStatus, ModelEvent, ModelRequest, Role, SharedModelClient,
    ToolCall,
};
use drover_store::{Checkpoint, CheckpointStore};

use crate::compaction::{self, CompactionConfig, CompactionOutcome};
use crate::config::{CheckpointPolicy, RunConfig};
use crate::delegate::{DelegationArgs, SubAgentRegistry};
use crate::error::Result;
use crate::events::{EventEmitter, RunEvent};
use crate::executor::{self, ToolRegistry};
use crate::interrupt::PendingQuestion;
use crate::reserved;
use crate::state::{next_phase, Phase, StepEvent, TerminationReason, ThreadState};
use crate::tool::ToolResult;

/// How one run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// The run reached a terminal state
    Finished {
        state: ThreadState,
        reason: TerminationReason,
    },
    /// The run is suspended awaiting a human reply
    Paused {
        state: ThreadState,
        question: PendingQuestion,
    },
}

impl RunOutcome {
    /// The final transcript, whatever the outcome
    pub fn transcript(&self) -> &[Message] {
        match self {
            RunOutcome::Finished { state, .. } | RunOutcome::Paused { state, .. } => {
                &state.transcript
            }
        }
    }

    /// The termination reason, if the run finished
    pub fn reason(&self) -> Option<TerminationReason> {
        match self {
            RunOutcome::Finished { reason, .. } => Some(*reason),
            RunOutcome::Paused { .. } => None,
        }
    }
}

/// Metadata serialized alongside each checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// The phase control is about to enter
    pub phase: Phase,
    pub respond_entries: u32,
    pub paused: bool,
}

/// Tracks the parent pointer while a run writes its checkpoint chain.
pub(crate) struct CheckpointCursor {
    store: Arc<dyn CheckpointStore>,
    thread_id: String,
    namespace: String,
    policy: CheckpointPolicy,
    parent: Option<String>,
}

impl CheckpointCursor {
    pub(crate) fn new(
        store: Arc<dyn CheckpointStore>,
        thread_id: impl Into<String>,
        namespace: impl Into<String>,
        policy: CheckpointPolicy,
        parent: Option<String>,
    ) -> Self {
        Self {
            store,
            thread_id: thread_id.into(),
            namespace: namespace.into(),
            policy,
            parent,
        }
    }

    async fn save(&mut self, state: &ThreadState, phase: Phase, paused: bool) -> Result<()> {
        let write = match self.policy {
            CheckpointPolicy::Disabled => false,
            CheckpointPolicy::PauseOnly => paused,
            CheckpointPolicy::EveryStep => true,
        };
        if !write {
            return Ok(());
        }
        let state_bytes = serde_json::to_vec(state)?;
        let metadata = serde_json::to_vec(&CheckpointMetadata {
            phase,
            respond_entries: state.respond_entries,
            paused,
        })?;
        let checkpoint = Checkpoint::new(
            &self.thread_id,
            &self.namespace,
            self.parent.take(),
            state_bytes,
            metadata,
        );
        let reference = self.store.put(checkpoint).await?;
        self.parent = Some(reference.checkpoint_id);
        Ok(())
    }
}

/// Drives one conversation through the think → tool → observe cycle.
pub struct Orchestrator {
    client: SharedModelClient,
    tools: Arc<ToolRegistry>,
    agents: Arc<SubAgentRegistry>,
    emitter: EventEmitter,
}

impl Orchestrator {
    pub fn new(client: SharedModelClient, tools: ToolRegistry, agents: SubAgentRegistry) -> Self {
        Self {
            client,
            tools: Arc::new(tools),
            agents: Arc::new(agents),
            emitter: EventEmitter::new(),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.emitter.subscribe()
    }

    pub(crate) fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Run the loop to a terminal state or a human pause, without
    /// persistence. The service boundary wires in checkpointing.
    pub async fn run(
        &self,
        state: ThreadState,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        self.run_from(state, config, cancel, None, Phase::Compact).await
    }

    /// Boxed variant so delegation can nest runs without an infinitely
    /// sized future.
    fn run_boxed<'a>(
        &'a self,
        state: ThreadState,
        config: &'a RunConfig,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(self.run(state, config, cancel))
    }

    pub(crate) async fn run_from(
        &self,
        mut state: ThreadState,
        config: &RunConfig,
        cancel: CancellationToken,
        mut cursor: Option<CheckpointCursor>,
        start: Phase,
    ) -> Result<RunOutcome> {
        self.emitter.emit(RunEvent::RunStart);
        let mut phase = start;

        loop {
            if cancel.is_cancelled() && !matches!(phase, Phase::Terminal(_)) {
                phase = next_phase(phase, StepEvent::Cancelled);
                continue;
            }

            match phase {
                Phase::Compact => {
                    self.compact_step(&mut state, config, &cancel).await;
                    phase = next_phase(Phase::Compact, StepEvent::Compacted);
                    self.save(&mut cursor, &state, phase, false).await;
                }

                Phase::Respond => {
                    if state.respond_entries >= config.recursion_limit {
                        phase = next_phase(Phase::Respond, StepEvent::StepLimitReached);
                        continue;
                    }
                    state.respond_entries += 1;
                    let event = self.respond_step(&mut state, config, &cancel).await;
                    phase = next_phase(Phase::Respond, event);
                    self.save(&mut cursor, &state, phase, false).await;
                }

                Phase::Tool => {
                    let calls = last_tool_calls(&state);
                    let results = self.run_calls(&calls, config, &cancel).await;
                    state.transcript.extend(results);
                    phase = next_phase(Phase::Tool, StepEvent::ToolsCompleted);
                    self.save(&mut cursor, &state, phase, false).await;
                }

                Phase::Task => {
                    let calls = last_tool_calls(&state);
                    let results = self.run_calls(&calls, config, &cancel).await;
                    state.transcript.extend(results);
                    state.active_task_calls = None;
                    phase = next_phase(Phase::Task, StepEvent::TasksCompleted);
                    self.save(&mut cursor, &state, phase, false).await;
                }

                Phase::Human => {
                    let calls = last_tool_calls(&state);
                    let Some(ask) = calls
                        .iter()
                        .find(|c| c.name == reserved::ASK_HUMAN_TOOL)
                        .cloned()
                    else {
                        phase = Phase::Terminal(TerminationReason::FatalError);
                        continue;
                    };

                    // Resolve every other call of the turn as skipped so
                    // nothing dangles across the pause
                    for call in calls.iter().filter(|c| c.id != ask.id) {
                        let mut skipped = Message::tool_running(&call.id, &call.name);
                        self.emitter.message_created(&skipped);
                        skipped.finish_error("Skipped while awaiting user input");
                        self.emitter.message_finished(&skipped);
                        state.transcript.push(skipped);
                    }

                    let placeholder = Message::tool_running(&ask.id, &ask.name);
                    self.emitter.message_created(&placeholder);
                    state.transcript.push(placeholder);

                    let question = PendingQuestion {
                        tool_call_id: ask.id.clone(),
                        payload: ask.arguments.clone(),
                    };
                    state.pending_question = Some(question.clone());
                    self.save(&mut cursor, &state, Phase::Human, true).await;
                    return Ok(RunOutcome::Paused { state, question });
                }

                Phase::Terminal(reason) => {
                    self.flush_running(&mut state, reason);
                    self.save(&mut cursor, &state, phase, false).await;
                    self.emitter.emit(RunEvent::RunEnd {
                        reason,
                        total_usage: state.total_usage.clone(),
                    });
                    return Ok(RunOutcome::Finished { state, reason });
                }
            }
        }
    }

    /// Manually compact the conversation, regardless of the token budget
    /// check. Exposed for embedding applications that offer an explicit
    /// "compact now" operation.
    pub async fn compact_now(
        &self,
        state: &mut ThreadState,
        config: &RunConfig,
    ) -> Result<()> {
        let forced = CompactionConfig {
            // A zero threshold makes any transcript over the floor eligible
            threshold: 0.0,
            ..config.compaction.clone()
        };
        self.emitter.emit(RunEvent::CompactionStart);
        match compaction::maybe_compact(
            &state.transcript,
            &forced,
            &config.model,
            &self.client,
            state.compaction_summary.as_deref(),
            &CancellationToken::new(),
        )
        .await
        {
            Ok(CompactionOutcome::Compacted {
                transcript,
                summary,
                tokens_before,
                tokens_after,
            }) => {
                state.transcript = transcript;
                state.is_compacted = true;
                state.compaction_summary = Some(summary);
                self.emitter.emit(RunEvent::CompactionEnd {
                    tokens_before,
                    tokens_after,
                });
                Ok(())
            }
            Ok(CompactionOutcome::Unchanged) => Ok(()),
            Err(e) => Err(crate::error::Error::Compaction(e)),
        }
    }

    // ---- Phase effects ----

    /// Check the token budget and compact if needed. Summarization failures
    /// are recoverable: the step proceeds with the uncompacted transcript.
    async fn compact_step(
        &self,
        state: &mut ThreadState,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) {
        if !compaction::needs_compaction(&state.transcript, &config.compaction, &config.model) {
            return;
        }
        self.emitter.emit(RunEvent::CompactionStart);
        match compaction::maybe_compact(
            &state.transcript,
            &config.compaction,
            &config.model,
            &self.client,
            state.compaction_summary.as_deref(),
            cancel,
        )
        .await
        {
            Ok(CompactionOutcome::Compacted {
                transcript,
                summary,
                tokens_before,
                tokens_after,
            }) => {
                state.transcript = transcript;
                state.is_compacted = true;
                state.compaction_summary = Some(summary);
                self.emitter.emit(RunEvent::CompactionEnd {
                    tokens_before,
                    tokens_after,
                });
            }
            Ok(CompactionOutcome::Unchanged) => {}
            Err(e) => {
                tracing::warn!("Compaction failed, continuing uncompacted: {}", e);
                self.emitter.emit(RunEvent::RunError {
                    message: format!("Compaction error: {}", e),
                });
            }
        }
    }

    fn build_request(&self, state: &ThreadState, config: &RunConfig) -> ModelRequest {
        let mut tools = self.tools.defs();
        if let Some(names) = &config.tool_names {
            tools.retain(|t| names.iter().any(|n| n == &t.name));
        }
        if config.allow_interrupts {
            tools.push(reserved::ask_human_def());
        }
        if config.allow_delegation {
            tools.push(reserved::delegate_def(&self.agents));
        }
        ModelRequest {
            system_prompt: config.system_prompt.clone(),
            messages: state.transcript.clone(),
            tools,
            model: Some(config.model.clone()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Call the model, stream the assistant message into the transcript,
    /// and classify the outcome.
    async fn respond_step(
        &self,
        state: &mut ThreadState,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> StepEvent {
        let request = self.build_request(state, config);
        let mut stream = match self.client.stream(request, cancel.child_token()).await {
            Ok(s) => s,
            Err(e) => {
                let mut msg = Message::assistant_empty();
                self.emitter.message_created(&msg);
                msg.finish_error(e.to_string());
                self.emitter.message_finished(&msg);
                self.emitter.emit(RunEvent::RunError {
                    message: e.to_string(),
                });
                state.transcript.push(msg);
                return StepEvent::ModelFailed;
            }
        };

        let mut builder = MessageBuilder::new();
        let mut current: Option<Message> = None;
        let mut final_message: Option<Message> = None;
        let mut stream_error: Option<String> = None;
        let mut was_cancelled = false;

        loop {
            let event = tokio::select! {
                e = stream.next() => match e {
                    Some(e) => e,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    was_cancelled = true;
                    break;
                }
            };

            match event {
                ModelEvent::Start { message } => {
                    self.emitter.message_created(&message);
                    current = Some(message);
                }
                ModelEvent::Done {
                    mut message, usage, ..
                } => {
                    if message.status == MessageStatus::Running {
                        message.status = MessageStatus::Success;
                    }
                    if message.usage.is_none() {
                        message.usage = Some(usage.clone());
                    }
                    state.total_usage.add(&usage);
                    self.emitter.message_finished(&message);
                    final_message = Some(message);
                }
                ModelEvent::Error { message } => {
                    stream_error = Some(message);
                    break;
                }
                delta => {
                    builder.process_event(&delta);
                    if let Some(m) = current.as_mut() {
                        m.content = builder.current_content();
                        self.emitter.message_chunk(m);
                    }
                }
            }
        }

        if was_cancelled || (stream_error.is_some() && cancel.is_cancelled()) {
            // Flush whatever partial state streamed before the cancellation
            if let Some(mut m) = current.take() {
                m.content = builder.current_content();
                m.finish_error("Cancelled");
                self.emitter.message_finished(&m);
                state.transcript.push(m);
            }
            return StepEvent::Cancelled;
        }

        if let Some(err) = stream_error {
            let mut msg = match current.take() {
                Some(mut m) => {
                    m.content = builder.current_content();
                    m
                }
                None => {
                    let m = Message::assistant_empty();
                    self.emitter.message_created(&m);
                    m
                }
            };
            msg.finish_error(err.clone());
            self.emitter.message_finished(&msg);
            state.transcript.push(msg);
            self.emitter.emit(RunEvent::RunError { message: err });
            return StepEvent::ModelFailed;
        }

        let Some(message) = final_message else {
            let err = "Model stream ended without a final message".to_string();
            let mut msg = match current.take() {
                Some(mut m) => {
                    m.content = builder.current_content();
                    m
                }
                None => {
                    let m = Message::assistant_empty();
                    self.emitter.message_created(&m);
                    m
                }
            };
            msg.finish_error(err.clone());
            self.emitter.message_finished(&msg);
            state.transcript.push(msg);
            self.emitter.emit(RunEvent::RunError { message: err });
            return StepEvent::ModelFailed;
        };

        let calls = message.tool_calls();
        state.transcript.push(message);

        if calls.is_empty() {
            return StepEvent::ModelFinal;
        }
        if config.allow_interrupts
            && calls.iter().any(|c| c.name == reserved::ASK_HUMAN_TOOL)
        {
            return StepEvent::ModelAskHuman;
        }
        if config.allow_delegation && calls.iter().any(|c| c.name == reserved::DELEGATE_TOOL) {
            state.active_task_calls = Some(
                calls
                    .iter()
                    .filter(|c| c.name == reserved::DELEGATE_TOOL)
                    .map(|c| c.id.clone())
                    .collect(),
            );
            return StepEvent::ModelDelegate;
        }
        StepEvent::ModelToolCalls
    }

    /// Execute the calls of one assistant turn concurrently, folding results
    /// back in call order. Every call resolves to a finished message before
    /// the state machine proceeds.
    async fn run_calls(
        &self,
        calls: &[ToolCall],
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> Vec<Message> {
        let mut placeholders: Vec<Message> = calls
            .iter()
            .map(|c| Message::tool_running(&c.id, &c.name))
            .collect();
        for placeholder in &placeholders {
            self.emitter.message_created(placeholder);
        }

        let futures = calls.iter().map(|call| self.resolve_call(call, config, cancel));
        let results = futures::future::join_all(futures).await;

        let mut out = Vec::with_capacity(calls.len());
        for (mut placeholder, result) in placeholders.drain(..).zip(results) {
            if result.is_error {
                placeholder.finish_error(result.text_content());
            } else {
                placeholder.finish_success(result.content);
            }
            placeholder.details = result.details;
            self.emitter.message_finished(&placeholder);
            out.push(placeholder);
        }
        out
    }

    async fn resolve_call(
        &self,
        call: &ToolCall,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> ToolResult {
        if call.name == reserved::DELEGATE_TOOL {
            if config.allow_delegation {
                self.delegate_call(call, config, cancel).await
            } else {
                ToolResult::error("Delegation is not available in this run")
            }
        } else if call.name == reserved::ASK_HUMAN_TOOL {
            // Reached only inside sub-runs, where interrupts are disabled
            ToolResult::error("Human input is not available in this run")
        } else if config
            .tool_names
            .as_ref()
            .is_some_and(|names| !names.iter().any(|n| n == &call.name))
        {
            ToolResult::error(format!("Tool not found: {}", call.name))
        } else {
            executor::invoke_tool(&self.tools, call, config.context.clone(), cancel).await
        }
    }

    /// Spawn an isolated sub-run for one delegate call and fold its final
    /// answer into a tool result. Failures stay local to this call.
    async fn delegate_call(
        &self,
        call: &ToolCall,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let args: DelegationArgs = match serde_json::from_value(call.arguments.clone()) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid delegation arguments: {}", e)),
        };
        let Some(definition) = self.agents.resolve(&args.agent) else {
            return ToolResult::error(format!("Unknown sub-agent: {}", args.agent));
        };

        let tools = match &definition.tools {
            Some(names) => Arc::new(self.tools.subset(names)),
            None => Arc::clone(&self.tools),
        };
        let sub = Orchestrator {
            client: Arc::clone(&self.client),
            tools,
            agents: Arc::clone(&self.agents),
            // Fresh emitter: intermediate sub-run messages are not surfaced
            // to the parent's subscribers
            emitter: EventEmitter::new(),
        };

        let mut sub_config = config.clone();
        // The sub-registry is already the definition's tool subset
        sub_config.tool_names = None;
        sub_config.system_prompt = if definition.system_prompt.is_empty() {
            None
        } else {
            Some(definition.system_prompt.clone())
        };
        if let Some(model) = &definition.model {
            sub_config.model = model.clone();
        }
        sub_config.allow_interrupts = false;
        sub_config.allow_delegation = false;
        sub_config.checkpoint = CheckpointPolicy::Disabled;

        let sub_state = ThreadState::with_transcript(vec![Message::user(&args.prompt)]);
        match sub.run_boxed(sub_state, &sub_config, cancel.child_token()).await {
            Ok(RunOutcome::Finished {
                state,
                reason: TerminationReason::Completed,
            }) => {
                let final_text = state
                    .transcript
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                    .map(|m| m.text())
                    .unwrap_or_default();
                let history = serde_json::to_value(&state.transcript).unwrap_or_default();
                ToolResult::text(final_text).with_details(serde_json::json!({
                    "agent": definition.name,
                    "history": history,
                }))
            }
            Ok(RunOutcome::Finished { reason, .. }) => {
                ToolResult::error(format!("Sub-agent run ended without completing: {:?}", reason))
            }
            Ok(RunOutcome::Paused { .. }) => {
                ToolResult::error("Sub-agent runs cannot wait for human input")
            }
            Err(e) => ToolResult::error(format!("Sub-agent run failed: {}", e)),
        }
    }

    /// Freeze any still-running message so no message is left permanently
    /// `Running` after a terminal transition.
    fn flush_running(&self, state: &mut ThreadState, reason: TerminationReason) {
        let label = match reason {
            TerminationReason::Cancelled => "Cancelled",
            _ => "Run terminated",
        };
        for message in state.transcript.iter_mut().filter(|m| m.is_running()) {
            message.finish_error(label);
            self.emitter.message_finished(message);
        }
    }

    async fn save(
        &self,
        cursor: &mut Option<CheckpointCursor>,
        state: &ThreadState,
        phase: Phase,
        paused: bool,
    ) {
        if let Some(cursor) = cursor.as_mut() {
            // Persistence is best-effort: a failed write must not take down
            // an otherwise healthy run
            if let Err(e) = cursor.save(state, phase, paused).await {
                tracing::warn!("Checkpoint write failed: {}", e);
            }
        }
    }
}

/// Tool calls of the assistant turn the loop is currently acting on
fn last_tool_calls(state: &ThreadState) -> Vec<ToolCall> {
    state
        .transcript
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.tool_calls())
        .unwrap_or_default()
}
