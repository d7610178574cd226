//! The narrow interface to the language-model client.
//!
//! The engine never talks to a provider directly; it hands a [`ModelRequest`]
//! to whatever implements [`ModelClient`] and consumes the returned event
//! stream. Provider plumbing (HTTP, SSE, auth) lives outside this workspace.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::stream::ModelEventStream;
use crate::types::ModelRequest;

/// A client that can stream one model response for a request.
///
/// Implementations must honor the cancellation token: a cancelled stream
/// should end promptly, either cleanly or with a terminal `Error` event.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
    ) -> Result<ModelEventStream>;
}

/// Shared handle to a model client
pub type SharedModelClient = Arc<dyn ModelClient>;
