//! Orchestration state and the phase transition function
//!
//! The step loop is a directed graph with cycles
//! (Tool → Compact → Respond → Tool …), so it is modeled as an explicit
//! phase enum plus a pure transition function the loop interprets. The whole
//! of [`ThreadState`] serializes, which is what makes checkpoint/resume work.

use serde::{Deserialize, Serialize};

use drover_model::{Message, Usage};

use crate::interrupt::PendingQuestion;

/// Why a run reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    Completed,
    Cancelled,
    StepLimitExceeded,
    FatalError,
}

/// One state of the orchestration loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Check the token budget and summarize the transcript head if needed
    Compact,
    /// Call the model with the current transcript
    Respond,
    /// Execute the tool calls of the last assistant turn
    Tool,
    /// Run delegated sub-agent tasks
    Task,
    /// Suspended awaiting externally supplied input
    Human,
    /// Run ended
    Terminal(TerminationReason),
}

/// What happened while interpreting the current phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// The compaction check finished (whether or not it compacted)
    Compacted,
    /// Model produced a final answer with no tool calls
    ModelFinal,
    /// Model asked the reserved human-input tool
    ModelAskHuman,
    /// Model requested at least one delegation
    ModelDelegate,
    /// Model requested ordinary tool calls
    ModelToolCalls,
    /// The model call failed
    ModelFailed,
    /// The respond-entry budget is exhausted
    StepLimitReached,
    /// All tool calls of the turn resolved
    ToolsCompleted,
    /// All delegated sub-runs resolved
    TasksCompleted,
    /// A human reply was applied to the pending question
    HumanReplied,
    /// The cancellation signal fired
    Cancelled,
}

/// The pure transition function of the orchestration state machine.
///
/// The loop performs effects and reports what happened as a [`StepEvent`];
/// this function alone decides where control goes next. An event that is not
/// legal in the given phase is a stuck machine and terminates the run.
pub fn next_phase(phase: Phase, event: StepEvent) -> Phase {
    use StepEvent::*;
    match (phase, event) {
        (_, Cancelled) => Phase::Terminal(TerminationReason::Cancelled),
        (Phase::Compact, Compacted) => Phase::Respond,
        (Phase::Respond, ModelFinal) => Phase::Terminal(TerminationReason::Completed),
        (Phase::Respond, ModelAskHuman) => Phase::Human,
        (Phase::Respond, ModelDelegate) => Phase::Task,
        (Phase::Respond, ModelToolCalls) => Phase::Tool,
        (Phase::Respond, ModelFailed) => Phase::Terminal(TerminationReason::FatalError),
        (Phase::Respond, StepLimitReached) => {
            Phase::Terminal(TerminationReason::StepLimitExceeded)
        }
        (Phase::Tool, ToolsCompleted) => Phase::Compact,
        (Phase::Task, TasksCompleted) => Phase::Respond,
        (Phase::Human, HumanReplied) => Phase::Respond,
        (phase, event) => {
            tracing::error!("Illegal transition: {:?} on {:?}", phase, event);
            Phase::Terminal(TerminationReason::FatalError)
        }
    }
}

/// The orchestrator's working state for one conversation run.
///
/// Mutated exclusively by the orchestrator's transition effects; recoverable
/// from the checkpoint store after the run ends or the process dies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadState {
    /// The ordered message history
    pub transcript: Vec<Message>,
    /// Whether compaction has replaced part of this transcript
    pub is_compacted: bool,
    /// The most recent compaction summary, folded into the next one
    pub compaction_summary: Option<String>,
    /// The unanswered human question, when suspended
    pub pending_question: Option<PendingQuestion>,
    /// Ids of delegate calls in flight during the Task phase
    pub active_task_calls: Option<Vec<String>>,
    /// How many times the run has entered the Respond state
    pub respond_entries: u32,
    /// Total usage across all turns
    pub total_usage: Usage,
}

impl ThreadState {
    /// Create a fresh state over an initial transcript
    pub fn with_transcript(transcript: Vec<Message>) -> Self {
        Self {
            transcript,
            ..Default::default()
        }
    }
}
