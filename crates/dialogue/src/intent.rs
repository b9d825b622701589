//! Intent routing (`intent_llm` mode)
//!
//! In `nointent` mode utterances go straight to dialogue and this service
//! is never consulted; in `function_call` mode recognition happens inline
//! through tool schemas. Here, a dedicated recognizer call decides whether
//! the utterance maps to a tool before the chat model runs.

use std::sync::Arc;

use voice_fleet_core::{ActionResponse, IntentRecognizer, ToolCall};
use voice_fleet_runtime::{DiContainer, SessionContext};
use voice_fleet_tools::ToolHandler;

use crate::DialogueError;

/// Fallback recognizer name when the agent config leaves it unset
const DEFAULT_INTENT_PROVIDER: &str = "intent.llm";

/// Pre-dialogue intent routing
pub struct IntentService {
    container: Arc<DiContainer>,
    tools: Arc<ToolHandler>,
}

impl IntentService {
    pub fn new(container: Arc<DiContainer>, tools: Arc<ToolHandler>) -> Self {
        Self { container, tools }
    }

    /// Classify the utterance; execute the matched tool if there is one
    ///
    /// `None` means free dialogue should proceed.
    pub async fn classify_and_execute(
        &self,
        session_id: &str,
        ctx: &SessionContext,
        text: &str,
    ) -> Result<Option<ActionResponse>, DialogueError> {
        let agent = ctx.agent();
        let provider_name = agent
            .providers
            .intent
            .clone()
            .unwrap_or_else(|| DEFAULT_INTENT_PROVIDER.to_string());
        let recognizer: Arc<dyn IntentRecognizer> = self
            .container
            .resolve_session(session_id, &provider_name)?;

        let definitions = self.tools.definitions(session_id);
        let recent = ctx.history.recent(6);
        let Some(intent) = recognizer.recognize(text, &recent, &definitions).await? else {
            return Ok(None);
        };

        tracing::info!(
            session_id = %session_id,
            intent = %intent.name,
            "intent recognized"
        );

        let call = ToolCall::new(
            format!("intent-{}", ctx.current_sentence_id()),
            intent.name,
            intent.arguments,
        );
        Ok(Some(self.tools.execute(session_id, &call).await))
    }
}
