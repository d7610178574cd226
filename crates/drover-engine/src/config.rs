//! Run configuration

use std::sync::Arc;

use drover_model::ModelSpec;

use crate::compaction::CompactionConfig;
use crate::tool::ToolContext;

/// Default maximum number of Respond-state entries per run
pub const DEFAULT_RECURSION_LIMIT: u32 = 25;

/// When orchestration state is written to the checkpoint store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointPolicy {
    /// After every completed step, before the next begins
    #[default]
    EveryStep,
    /// Only when the run pauses for human input
    PauseOnly,
    /// Never
    Disabled,
}

/// Configuration for one orchestration run
#[derive(Clone)]
pub struct RunConfig {
    /// Model to drive the conversation with
    pub model: ModelSpec,
    /// System prompt sent on every model call
    pub system_prompt: Option<String>,
    /// Context compaction configuration
    pub compaction: CompactionConfig,
    /// Restrict this run to the named tools; None = every registered tool
    pub tool_names: Option<Vec<String>>,
    /// Maximum number of Respond-state entries before the run fails with
    /// step-limit-exceeded
    pub recursion_limit: u32,
    /// Maximum tokens per model response
    pub max_tokens: Option<u32>,
    /// Temperature for model calls
    pub temperature: Option<f32>,
    /// Checkpoint persistence policy
    pub checkpoint: CheckpointPolicy,
    /// Checkpoint namespace
    pub namespace: String,
    /// Opaque context bag handed to every tool invocation
    pub context: Arc<ToolContext>,
    /// Whether the run may pause for human input (off inside sub-runs)
    pub allow_interrupts: bool,
    /// Whether the run may delegate to sub-agents (off inside sub-runs)
    pub allow_delegation: bool,
}

impl RunConfig {
    pub fn new(model: ModelSpec) -> Self {
        Self {
            model,
            system_prompt: None,
            compaction: CompactionConfig::default(),
            tool_names: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            max_tokens: None,
            temperature: None,
            checkpoint: CheckpointPolicy::default(),
            namespace: String::new(),
            context: Arc::new(ToolContext::default()),
            allow_interrupts: true,
            allow_delegation: true,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint = policy;
        self
    }

    pub fn with_context(mut self, context: ToolContext) -> Self {
        self.context = Arc::new(context);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::new(ModelSpec::new("test-model"));
        assert_eq!(config.recursion_limit, DEFAULT_RECURSION_LIMIT);
        assert_eq!(config.checkpoint, CheckpointPolicy::EveryStep);
        assert!(config.allow_interrupts);
        assert!(config.allow_delegation);
        assert!(config.compaction.enabled);
    }
}
