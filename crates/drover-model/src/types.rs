//! Core transcript and model types

use serde::{Deserialize, Serialize};

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }
}

/// Lifecycle status of a message.
///
/// Messages are created `Running`, mutate while streaming, and freeze once
/// they reach `Success` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Running,
    Success,
    Error,
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
    pub cache_read: u32,
    pub cache_write: u32,
}

impl Usage {
    /// Accumulate another usage into this one
    pub fn add(&mut self, other: &Usage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
    }
}

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    Stop,
    /// Maximum tokens reached
    Length,
    /// Tool use requested
    ToolUse,
    /// Error occurred
    Error,
    /// Request was aborted
    Aborted,
}

/// Content types in messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Text content
    Text { text: String },
    /// Thinking/reasoning content
    Thinking { thinking: String },
    /// Tool call request
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
}

impl Content {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create thinking content
    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self::Thinking {
            thinking: thinking.into(),
        }
    }

    /// Create a tool call
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Get text if this is text content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Check if this is a tool call
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One unit of the transcript.
///
/// The orchestrator owns the transcript sequence; observers only ever see
/// messages through lifecycle events and never mutate them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Opaque unique id
    pub id: String,
    pub role: Role,
    pub content: Vec<Content>,
    /// Id of the originating tool call (role = Tool only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the originating tool (role = Tool only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured details for display (e.g. a sub-run's auxiliary history);
    /// never sent back to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    fn base(role: Role, content: Vec<Content>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            tool_call_id: None,
            tool_name: None,
            status: MessageStatus::Success,
            usage: None,
            error: None,
            details: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::base(Role::User, vec![Content::text(text)])
    }

    /// Create a user message with multiple content blocks
    pub fn user_with_content(content: Vec<Content>) -> Self {
        Self::base(Role::User, content)
    }

    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::base(Role::System, vec![Content::text(text)])
    }

    /// Create an empty assistant message in `Running` state
    pub fn assistant_empty() -> Self {
        let mut msg = Self::base(Role::Assistant, vec![]);
        msg.status = MessageStatus::Running;
        msg
    }

    /// Create an assistant message with the given content
    pub fn assistant(content: Vec<Content>) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// Create a tool-result placeholder in `Running` state
    pub fn tool_running(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        let mut msg = Self::base(Role::Tool, vec![]);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.tool_name = Some(tool_name.into());
        msg.status = MessageStatus::Running;
        msg
    }

    /// Create a finished tool-result message
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<Content>,
        is_error: bool,
    ) -> Self {
        let mut msg = Self::base(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.tool_name = Some(tool_name.into());
        if is_error {
            msg.status = MessageStatus::Error;
            msg.error = Some(msg.text());
        }
        msg
    }

    /// Freeze this message as successful with the given content
    pub fn finish_success(&mut self, content: Vec<Content>) {
        self.content = content;
        self.status = MessageStatus::Success;
    }

    /// Freeze this message as failed, recording the error string
    pub fn finish_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        if self.content.is_empty() {
            self.content = vec![Content::text(error.clone())];
        }
        self.status = MessageStatus::Error;
        self.error = Some(error);
    }

    /// Whether this message is still streaming or awaiting a result
    pub fn is_running(&self) -> bool {
        self.status == MessageStatus::Running
    }

    /// Extract all tool calls from an assistant message
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        if self.role != Role::Assistant {
            return vec![];
        }
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Model definition as seen by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model identifier (e.g., "claude-sonnet-4-5")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Context window size in tokens; 0 when the model does not report one
    pub context_window: u32,
    /// Maximum output tokens
    pub max_tokens: u32,
}

impl ModelSpec {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            context_window: 0,
            max_tokens: 4096,
        }
    }

    pub fn with_context_window(mut self, context_window: u32) -> Self {
        self.context_window = context_window;
        self
    }
}

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// One streaming request to the model client
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Available tools
    pub tools: Vec<ToolDef>,
    /// Model to use
    pub model: Option<ModelSpec>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_user() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.status, MessageStatus::Success);
        assert_eq!(msg.text(), "hello");
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_message_tool_running_then_success() {
        let mut msg = Message::tool_running("call_1", "read");
        assert_eq!(msg.role, Role::Tool);
        assert!(msg.is_running());
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.tool_name.as_deref(), Some("read"));

        msg.finish_success(vec![Content::text("file contents")]);
        assert_eq!(msg.status, MessageStatus::Success);
        assert_eq!(msg.text(), "file contents");
        assert!(msg.error.is_none());
    }

    #[test]
    fn test_message_tool_finish_error() {
        let mut msg = Message::tool_running("call_1", "read");
        msg.finish_error("no such file");
        assert_eq!(msg.status, MessageStatus::Error);
        assert_eq!(msg.error.as_deref(), Some("no such file"));
        assert_eq!(msg.text(), "no such file");
    }

    #[test]
    fn test_tool_calls_extraction() {
        let msg = Message::assistant(vec![
            Content::text("working on it"),
            Content::tool_call("a", "read", serde_json::json!({"path": "/x"})),
            Content::tool_call("b", "grep", serde_json::json!({"pattern": "fn"})),
        ]);
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[1].name, "grep");
    }

    #[test]
    fn test_tool_calls_empty_for_non_assistant() {
        let msg = Message::user("hi");
        assert!(msg.tool_calls().is_empty());
    }

    #[test]
    fn test_usage_add() {
        let mut total = Usage::default();
        total.add(&Usage {
            input: 10,
            output: 5,
            cache_read: 2,
            cache_write: 1,
        });
        total.add(&Usage {
            input: 1,
            output: 1,
            cache_read: 0,
            cache_write: 0,
        });
        assert_eq!(total.input, 11);
        assert_eq!(total.output, 6);
        assert_eq!(total.cache_read, 2);
    }

    #[test]
    fn test_message_serde_round_trip() {
        let msg = Message::tool_result("call_9", "bash", vec![Content::text("exit 1")], true);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Tool);
        assert_eq!(back.status, MessageStatus::Error);
        assert_eq!(back.tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(back.text(), "exit 1");
    }
}
