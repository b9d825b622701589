//! Intent recognition port

use async_trait::async_trait;

use crate::conversation::Turn;
use crate::error::Result;
use crate::llm::ToolDefinition;

/// A classified user goal with structured arguments
#[derive(Debug, Clone)]
pub struct DetectedIntent {
    /// Tool or intent name; adapters return `None` for plain chat
    pub name: String,
    /// Arguments as a JSON object
    pub arguments: serde_json::Value,
}

/// Intent recognition port (used in `intent_llm` mode)
#[async_trait]
pub trait IntentRecognizer: Send + Sync {
    /// Classify an utterance against the available tools
    ///
    /// Returns `None` when the utterance is free dialogue.
    async fn recognize(
        &self,
        text: &str,
        recent_turns: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<Option<DetectedIntent>>;

    /// Adapter name for logging
    fn name(&self) -> &str;
}
