//! drover-model: message types and the model-client abstraction layer
//!
//! This crate defines the transcript data model (messages, content parts,
//! usage) and the narrow streaming interface the orchestration engine uses
//! to talk to a language model. Concrete provider clients live outside the
//! engine and implement [`ModelClient`].

pub mod client;
pub mod error;
pub mod stream;
pub mod types;

pub use client::{ModelClient, SharedModelClient};
pub use error::{Error, Result};
pub use stream::{MessageBuilder, ModelEvent, ModelEventStream};
pub use types::{
    Content, Message, MessageStatus, ModelRequest, ModelSpec, Role, StopReason, ToolCall, ToolDef,
    Usage,
};
