//! Sub-agent definitions and the delegation registry
//!
//! A delegation is an isolated, stateless sub-run: fresh transcript, the
//! sub-agent's own system prompt and tool subset, executed through the same
//! orchestration loop. Only the sub-run's final message is folded back into
//! the parent transcript; intermediate messages ride along as display-only
//! details.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use drover_model::ModelSpec;

/// Reserved sub-agent name that needs no registration
pub const GENERAL_PURPOSE: &str = "general-purpose";

/// A named sub-agent capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentDefinition {
    pub name: String,
    pub description: String,
    /// System instructions for the sub-run
    pub system_prompt: String,
    /// Subset of the parent's tools this agent may use; None = all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Model override; None = the parent run's model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSpec>,
}

impl SubAgentDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            tools: None,
            model: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_model(mut self, model: ModelSpec) -> Self {
        self.model = Some(model);
        self
    }
}

/// Registry mapping sub-agent names to definitions
#[derive(Debug, Clone, Default)]
pub struct SubAgentRegistry {
    agents: HashMap<String, SubAgentDefinition>,
}

impl SubAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: SubAgentDefinition) {
        self.agents.insert(definition.name.clone(), definition);
    }

    /// Registered agent names (the reserved general-purpose agent is not
    /// listed; it is always resolvable)
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Resolve a sub-agent by name. The reserved name requires no lookup.
    pub fn resolve(&self, name: &str) -> Option<SubAgentDefinition> {
        if name == GENERAL_PURPOSE {
            return Some(SubAgentDefinition::new(
                GENERAL_PURPOSE,
                "General agent for multi-step tasks",
                "",
            ));
        }
        self.agents.get(name).cloned()
    }
}

/// Arguments of a delegate tool call
#[derive(Debug, Deserialize)]
pub(crate) struct DelegationArgs {
    pub agent: String,
    pub prompt: String,
}
