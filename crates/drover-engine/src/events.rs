//! Run lifecycle events
//!
//! The emitter is the only channel through which a run reports observable
//! progress. For a given message id the order is always
//! created → zero or more chunks → exactly one finished; within a turn,
//! tool-result finished events appear in tool-call order.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use drover_model::{Message, Usage};

use crate::state::TerminationReason;

/// Events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// The run started processing
    RunStart,

    /// A new message entered the transcript in `Running` state
    MessageCreated { message: Message },

    /// Streamed content accumulated on a running message
    MessageChunk { message: Message },

    /// A message froze with success or error status
    MessageFinished { message: Message },

    /// Context compaction started
    CompactionStart,

    /// Context compaction completed
    CompactionEnd { tokens_before: u32, tokens_after: u32 },

    /// A recoverable error was absorbed into transcript state
    RunError { message: String },

    /// The run reached a terminal state
    RunEnd {
        reason: TerminationReason,
        total_usage: Usage,
    },
}

impl RunEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::RunEnd { .. })
    }
}

/// Fan-out sender for run events.
///
/// Observers never mutate message content, only watch it go by. Sending with
/// no subscribers is fine and the result is deliberately ignored.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    pub fn message_created(&self, message: &Message) {
        self.emit(RunEvent::MessageCreated {
            message: message.clone(),
        });
    }

    pub fn message_chunk(&self, message: &Message) {
        self.emit(RunEvent::MessageChunk {
            message: message.clone(),
        });
    }

    pub fn message_finished(&self, message: &Message) {
        self.emit(RunEvent::MessageFinished {
            message: message.clone(),
        });
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
