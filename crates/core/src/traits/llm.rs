//! Language model port

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::Result;
use crate::llm::{ChatRequest, LlmChunk};

/// Stream of model output chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<LlmChunk>> + Send>>;

/// Streaming chat completion port
///
/// Adapters assemble provider-specific tool-call deltas into whole
/// [`crate::ToolCall`] items before yielding them.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start a streamed completion
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}
