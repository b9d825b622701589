//! In-process conversation memory
//!
//! Keeps per-device summaries for the lifetime of the process. A real
//! deployment points the memory port at an external store; the engine only
//! defines the port.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;

use voice_fleet_core::{
    ChatRequest, LanguageModel, LlmChunk, Memory, Message, Result, Turn, TurnRole,
};

const SUMMARY_PROMPT: &str = "Summarize this conversation in two sentences, keeping names, \
preferences, and unfinished requests. Reply with the summary only.";

/// Per-device rolling summaries
pub struct InMemoryMemory {
    summaries: DashMap<String, Vec<String>>,
    /// Summarizer; without one, a plain digest of the last user turn is kept
    llm: Option<Arc<dyn LanguageModel>>,
    max_entries: usize,
}

impl InMemoryMemory {
    pub fn new(llm: Option<Arc<dyn LanguageModel>>) -> Self {
        Self {
            summaries: DashMap::new(),
            llm,
            max_entries: 10,
        }
    }

    async fn summarize(&self, turns: &[Turn]) -> String {
        if let Some(llm) = &self.llm {
            let mut transcript = String::new();
            for turn in turns {
                transcript.push_str(&format!("{:?}: {}\n", turn.role, turn.content));
            }
            let request = ChatRequest::new(SUMMARY_PROMPT)
                .with_messages(vec![Message::user(transcript)])
                .with_max_tokens(128)
                .with_temperature(0.2);

            match llm.chat_stream(request).await {
                Ok(mut stream) => {
                    let mut summary = String::new();
                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(LlmChunk::Text(t)) => summary.push_str(&t),
                            Ok(LlmChunk::Done(_)) => break,
                            Ok(LlmChunk::ToolCall(_)) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "memory summarization failed mid-stream");
                                break;
                            }
                        }
                    }
                    if !summary.trim().is_empty() {
                        return summary.trim().to_string();
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "memory summarization call failed");
                }
            }
        }

        // Digest fallback: last user utterance plus turn count.
        let last_user = turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::User)
            .map(|t| t.content.as_str())
            .unwrap_or("");
        format!("{} turns; last topic: {}", turns.len(), last_user)
    }
}

#[async_trait]
impl Memory for InMemoryMemory {
    async fn recall(&self, device_id: &str, _query: &str) -> Result<Option<String>> {
        Ok(self
            .summaries
            .get(device_id)
            .and_then(|entries| entries.last().cloned()))
    }

    async fn store(&self, device_id: &str, turns: &[Turn]) -> Result<()> {
        if turns.is_empty() {
            return Ok(());
        }
        let summary = self.summarize(turns).await;
        let mut entries = self.summaries.entry(device_id.to_string()).or_default();
        entries.push(summary);
        if entries.len() > self.max_entries {
            entries.remove(0);
        }
        tracing::debug!(device_id = %device_id, entries = entries.len(), "memory stored");
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_recall() {
        let memory = InMemoryMemory::new(None);
        let turns = vec![Turn::user("remember I like jazz"), Turn::assistant("noted")];
        memory.store("dev-1", &turns).await.unwrap();

        let recalled = memory.recall("dev-1", "music").await.unwrap().unwrap();
        assert!(recalled.contains("jazz"));
        // Unknown device has nothing.
        assert!(memory.recall("dev-2", "music").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_history_is_not_stored() {
        let memory = InMemoryMemory::new(None);
        memory.store("dev-1", &[]).await.unwrap();
        assert!(memory.recall("dev-1", "").await.unwrap().is_none());
    }
}
