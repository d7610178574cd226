//! Reserved tool names consumed as control signals
//!
//! These are advertised to the model like ordinary tools but are resolved by
//! the orchestrator itself rather than the registry.

use drover_model::ToolDef;

use crate::delegate::SubAgentRegistry;

/// Pauses the run until the caller supplies a reply
pub const ASK_HUMAN_TOOL: &str = "ask_human";

/// Spawns an isolated sub-agent run for a bounded sub-task
pub const DELEGATE_TOOL: &str = "delegate";

/// API definition for the human-input tool
pub fn ask_human_def() -> ToolDef {
    ToolDef::new(
        ASK_HUMAN_TOOL,
        "Ask the user a question and wait for their reply. Use this when you \
         need information or a decision only the user can provide.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to present to the user"
                },
                "choices": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional fixed choices to offer"
                }
            },
            "required": ["question"]
        }),
    )
}

/// API definition for the delegation tool, listing the registered sub-agents
pub fn delegate_def(agents: &SubAgentRegistry) -> ToolDef {
    let mut description = String::from(
        "Delegate a bounded sub-task to an isolated sub-agent and receive its \
         final answer. Available agents: general-purpose",
    );
    for name in agents.names() {
        description.push_str(", ");
        description.push_str(name);
    }

    ToolDef::new(
        DELEGATE_TOOL,
        description,
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Name of the sub-agent to run"
                },
                "prompt": {
                    "type": "string",
                    "description": "The complete task description for the sub-agent"
                }
            },
            "required": ["agent", "prompt"]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::SubAgentDefinition;

    #[test]
    fn test_ask_human_def_shape() {
        let def = ask_human_def();
        assert_eq!(def.name, ASK_HUMAN_TOOL);
        assert_eq!(def.parameters["required"][0], "question");
    }

    #[test]
    fn test_delegate_def_lists_registered_agents() {
        let mut agents = SubAgentRegistry::new();
        agents.register(SubAgentDefinition::new("researcher", "Looks things up", "You research."));
        let def = delegate_def(&agents);
        assert!(def.description.contains("general-purpose"));
        assert!(def.description.contains("researcher"));
    }
}
