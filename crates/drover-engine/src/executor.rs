//! Tool resolution and invocation
//!
//! Tools and sub-agents are resolved by name at runtime, so the registry
//! treats an unknown name as a data condition: the call gets an error-status
//! result and the run continues.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use drover_model::{ToolCall, ToolDef};

use crate::tool::{to_tool_def, BoxedTool, ToolContext, ToolResult};

/// Registry mapping tool names to implementations, with compiled JSON
/// Schema validators cached per tool.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, BoxedTool>,
    validators: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling and caching its schema validator.
    pub fn register(&mut self, tool: BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.validators
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by exact name
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.get(name)
    }

    /// Registered tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// API definitions of every registered tool
    pub fn defs(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| to_tool_def(t.as_ref())).collect()
    }

    /// A registry containing only the named subset of this one
    pub fn subset(&self, names: &[String]) -> ToolRegistry {
        let mut out = ToolRegistry::new();
        for name in names {
            if let Some(tool) = self.tools.get(name) {
                out.tools.insert(name.clone(), tool.clone());
                if let Some(validator) = self.validators.get(name) {
                    out.validators.insert(name.clone(), validator.clone());
                }
            } else {
                tracing::warn!("Sub-agent tool '{}' is not registered", name);
            }
        }
        out
    }

    /// Validate arguments against a tool's cached schema validator.
    /// Returns `Some(error_message)` on failure, `None` when valid or when
    /// the tool has no usable schema.
    pub fn validate(&self, name: &str, args: &serde_json::Value) -> Option<String> {
        self.validators
            .get(name)
            .and_then(|validator| validate_with_validator(args, validator))
    }
}

/// Validate tool arguments using a pre-compiled validator.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

/// Resolve and run one tool call: unknown names and invalid arguments become
/// error results, and cancellation cuts the invocation short.
pub(crate) async fn invoke_tool(
    registry: &ToolRegistry,
    call: &ToolCall,
    ctx: Arc<ToolContext>,
    cancel: &CancellationToken,
) -> ToolResult {
    let Some(tool) = registry.get(&call.name) else {
        return ToolResult::error(format!("Tool not found: {}", call.name));
    };

    if let Some(err) = registry.validate(&call.name, &call.arguments) {
        return ToolResult::error(err);
    }

    tokio::select! {
        result = tool.execute(&call.id, call.arguments.clone(), ctx, cancel.child_token()) => result,
        _ = cancel.cancelled() => ToolResult::error("Cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::tool::Tool;

    struct AddTool;

    #[async_trait]
    impl Tool for AddTool {
        fn name(&self) -> &str {
            "add"
        }
        fn description(&self) -> &str {
            "Adds two integers"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "a": { "type": "integer" },
                    "b": { "type": "integer" }
                },
                "required": ["a", "b"]
            })
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            arguments: serde_json::Value,
            _ctx: Arc<ToolContext>,
            _cancel: CancellationToken,
        ) -> ToolResult {
            let a = arguments["a"].as_i64().unwrap_or(0);
            let b = arguments["b"].as_i64().unwrap_or(0);
            ToolResult::text((a + b).to_string())
        }
    }

    /// A tool that never finishes on its own.
    struct HangingTool;

    #[async_trait]
    impl Tool for HangingTool {
        fn name(&self) -> &str {
            "hang"
        }
        fn description(&self) -> &str {
            "Waits forever"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            _arguments: serde_json::Value,
            _ctx: Arc<ToolContext>,
            cancel: CancellationToken,
        ) -> ToolResult {
            cancel.cancelled().await;
            ToolResult::error("Cancelled")
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(Arc::new(AddTool));
        r.register(Arc::new(HangingTool));
        r
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn test_invoke_known_tool() {
        let r = registry();
        let result = invoke_tool(
            &r,
            &call("add", serde_json::json!({"a": 2, "b": 3})),
            Arc::new(ToolContext::default()),
            &CancellationToken::new(),
        )
        .await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "5");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let r = registry();
        let result = invoke_tool(
            &r,
            &call("nope", serde_json::json!({})),
            Arc::new(ToolContext::default()),
            &CancellationToken::new(),
        )
        .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("Tool not found: nope"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_before_execution() {
        let r = registry();
        let result = invoke_tool(
            &r,
            &call("add", serde_json::json!({"a": "two"})),
            Arc::new(ToolContext::default()),
            &CancellationToken::new(),
        )
        .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("validation failed"));
    }

    #[tokio::test]
    async fn test_cancellation_cuts_invocation_short() {
        let r = registry();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = invoke_tool(
            &r,
            &call("hang", serde_json::json!({})),
            Arc::new(ToolContext::default()),
            &cancel,
        )
        .await;
        assert!(result.is_error);
        assert_eq!(result.text_content(), "Cancelled");
    }

    #[test]
    fn test_subset_keeps_only_named_tools() {
        let r = registry();
        let sub = r.subset(&["add".to_string()]);
        assert!(sub.get("add").is_some());
        assert!(sub.get("hang").is_none());
    }

    #[test]
    fn test_invalid_schema_skips_validation() {
        struct BadSchemaTool;

        #[async_trait]
        impl Tool for BadSchemaTool {
            fn name(&self) -> &str {
                "bad"
            }
            fn description(&self) -> &str {
                "Schema does not compile"
            }
            fn parameters_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "not_a_real_type"})
            }
            async fn execute(
                &self,
                _tool_call_id: &str,
                _arguments: serde_json::Value,
                _ctx: Arc<ToolContext>,
                _cancel: CancellationToken,
            ) -> ToolResult {
                ToolResult::text("ran")
            }
        }

        let mut r = ToolRegistry::new();
        r.register(Arc::new(BadSchemaTool));
        // Validation is skipped rather than rejecting every call
        assert!(r.validate("bad", &serde_json::json!({"anything": true})).is_none());
    }
}
