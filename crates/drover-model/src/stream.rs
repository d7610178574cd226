//! Streaming event types and utilities

use crate::types::{Content, Message, MessageStatus, StopReason, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted by a model client while streaming a response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelEvent {
    /// Initial message structure (status `Running`)
    Start { message: Message },
    /// Text content delta
    TextDelta { content_index: usize, delta: String },
    /// Thinking content delta
    ThinkingDelta { content_index: usize, delta: String },
    /// Tool call started
    ToolCallStart {
        content_index: usize,
        id: String,
        name: String,
    },
    /// Tool call arguments delta (partial JSON)
    ToolCallDelta { content_index: usize, delta: String },
    /// Tool call completed
    ToolCallEnd {
        content_index: usize,
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// Message completed successfully
    Done {
        message: Message,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred
    Error { message: String },
}

impl ModelEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModelEvent::Done { .. } | ModelEvent::Error { .. })
    }

    /// Get the final message if this is a Done event
    pub fn into_message(self) -> Option<Message> {
        match self {
            ModelEvent::Done { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// A stream of model events
pub type ModelEventStream = Pin<Box<dyn Stream<Item = ModelEvent> + Send>>;

/// Builder for constructing an assistant message from streaming events
#[derive(Debug, Default)]
pub struct MessageBuilder {
    content_buffers: Vec<ContentBuffer>,
    usage: Usage,
}

#[derive(Debug)]
enum ContentBuffer {
    Text(String),
    Thinking(String),
    ToolCall {
        id: String,
        name: String,
        arguments_json: String,
    },
}

impl MessageBuilder {
    /// Create a new message builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event and update the message state
    pub fn process_event(&mut self, event: &ModelEvent) {
        match event {
            ModelEvent::TextDelta {
                content_index,
                delta,
            } => {
                self.ensure_buffer(*content_index, || ContentBuffer::Text(String::new()));
                if let Some(ContentBuffer::Text(text)) =
                    self.content_buffers.get_mut(*content_index)
                {
                    text.push_str(delta);
                }
            }
            ModelEvent::ThinkingDelta {
                content_index,
                delta,
            } => {
                self.ensure_buffer(*content_index, || ContentBuffer::Thinking(String::new()));
                if let Some(ContentBuffer::Thinking(thinking)) =
                    self.content_buffers.get_mut(*content_index)
                {
                    thinking.push_str(delta);
                }
            }
            ModelEvent::ToolCallStart {
                content_index,
                id,
                name,
            } => {
                let buffer = ContentBuffer::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments_json: String::new(),
                };
                self.set_buffer(*content_index, buffer);
            }
            ModelEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                if let Some(ContentBuffer::ToolCall { arguments_json, .. }) =
                    self.content_buffers.get_mut(*content_index)
                {
                    arguments_json.push_str(delta);
                }
            }
            ModelEvent::ToolCallEnd {
                content_index,
                id,
                name,
                arguments,
            } => {
                let buffer = ContentBuffer::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments_json: arguments.to_string(),
                };
                self.set_buffer(*content_index, buffer);
            }
            ModelEvent::Done { usage, .. } => {
                self.usage = usage.clone();
            }
            _ => {}
        }
    }

    /// Get the current partial content state
    pub fn current_content(&self) -> Vec<Content> {
        self.content_buffers
            .iter()
            .map(|buf| match buf {
                ContentBuffer::Text(text) => Content::Text { text: text.clone() },
                ContentBuffer::Thinking(thinking) => Content::Thinking {
                    thinking: thinking.clone(),
                },
                ContentBuffer::ToolCall {
                    id,
                    name,
                    arguments_json,
                } => {
                    let arguments = serde_json::from_str(arguments_json).unwrap_or_default();
                    Content::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments,
                    }
                }
            })
            .collect()
    }

    /// Build the accumulated content into a finished assistant message,
    /// reusing the id of the `Start` message.
    pub fn build_into(self, mut message: Message) -> Message {
        message.content = self
            .content_buffers
            .into_iter()
            .map(|buf| match buf {
                ContentBuffer::Text(text) => Content::Text { text },
                ContentBuffer::Thinking(thinking) => Content::Thinking { thinking },
                ContentBuffer::ToolCall {
                    id,
                    name,
                    arguments_json,
                } => {
                    let arguments =
                        serde_json::from_str(&arguments_json).unwrap_or(serde_json::Value::Null);
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    }
                }
            })
            .collect();
        message.status = MessageStatus::Success;
        message.usage = Some(self.usage);
        message
    }

    fn ensure_buffer(&mut self, index: usize, default: impl FnOnce() -> ContentBuffer) {
        if self.content_buffers.len() <= index {
            while self.content_buffers.len() < index {
                self.content_buffers.push(ContentBuffer::Text(String::new()));
            }
            self.content_buffers.push(default());
        }
    }

    fn set_buffer(&mut self, index: usize, buffer: ContentBuffer) {
        while self.content_buffers.len() <= index {
            self.content_buffers.push(ContentBuffer::Text(String::new()));
        }
        self.content_buffers[index] = buffer;
    }
}
