//! LLM-based intent recognition (`intent_llm` mode)

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

use voice_fleet_core::{
    ChatRequest, DetectedIntent, Error, IntentRecognizer, LanguageModel, LlmChunk, Message, Result,
    ToolDefinition, Turn,
};

const INTENT_PROMPT: &str = "You classify a voice command against a list of functions. \
Reply with a single JSON object: {\"intent\": \"<function name>\", \"arguments\": {...}} \
when one of the functions matches, or {\"intent\": \"continue_chat\"} when none does. \
No prose, no markdown.";

/// Classifies an utterance with a dedicated model call
pub struct LlmIntentRecognizer {
    llm: Arc<dyn LanguageModel>,
}

impl LlmIntentRecognizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    fn build_request(text: &str, recent_turns: &[Turn], tools: &[ToolDefinition]) -> ChatRequest {
        let mut prompt = String::from(INTENT_PROMPT);
        prompt.push_str("\n\nFunctions:\n");
        for tool in tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
        if !recent_turns.is_empty() {
            prompt.push_str("\nRecent conversation:\n");
            for turn in recent_turns {
                prompt.push_str(&format!("{:?}: {}\n", turn.role, turn.content));
            }
        }

        ChatRequest::new(prompt)
            .with_messages(vec![Message::user(text)])
            .with_max_tokens(128)
            .with_temperature(0.0)
    }

    /// First balanced JSON object in the reply
    ///
    /// Models add prose around the object often enough that a greedy scan
    /// to the last `}` would swallow trailing asides; walk brace depth from
    /// the first `{` instead, skipping braces inside string literals.
    fn first_json_object(raw: &str) -> Option<&str> {
        let start = raw.find('{')?;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, c) in raw[start..].char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&raw[start..start + i + c.len_utf8()]);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn parse(raw: &str) -> Option<DetectedIntent> {
        let block = Self::first_json_object(raw)?;
        let value: serde_json::Value = serde_json::from_str(block).ok()?;
        let name = value.get("intent")?.as_str()?.to_string();
        if name == "continue_chat" {
            return None;
        }
        let arguments = value
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::Value::Object(Default::default()));
        Some(DetectedIntent { name, arguments })
    }
}

#[async_trait]
impl IntentRecognizer for LlmIntentRecognizer {
    async fn recognize(
        &self,
        text: &str,
        recent_turns: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<Option<DetectedIntent>> {
        if tools.is_empty() {
            return Ok(None);
        }

        let request = Self::build_request(text, recent_turns, tools);
        let mut stream = self.llm.chat_stream(request).await?;
        let mut raw = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                LlmChunk::Text(t) => raw.push_str(&t),
                LlmChunk::Done(_) => break,
                LlmChunk::ToolCall(_) => {
                    return Err(Error::provider(
                        "intent",
                        "intent model unexpectedly produced a tool call",
                    ))
                }
            }
        }

        Ok(Self::parse(&raw))
    }

    fn name(&self) -> &str {
        "llm-intent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extracts_intent_and_arguments() {
        let raw = "Sure: {\"intent\": \"play_music\", \"arguments\": {\"song_name\": \"jazz\"}}";
        let intent = LlmIntentRecognizer::parse(raw).unwrap();
        assert_eq!(intent.name, "play_music");
        assert_eq!(intent.arguments["song_name"], "jazz");
    }

    #[test]
    fn test_parse_ignores_trailing_brace_aside() {
        // A later stray brace must not extend the captured object.
        let raw = "{\"intent\": \"play_music\", \"arguments\": {\"song_name\": \"jazz\"}} {smile}";
        let intent = LlmIntentRecognizer::parse(raw).unwrap();
        assert_eq!(intent.name, "play_music");
        assert_eq!(intent.arguments["song_name"], "jazz");
    }

    #[test]
    fn test_parse_handles_braces_inside_strings() {
        let raw = "{\"intent\": \"play_music\", \"arguments\": {\"song_name\": \"set {live}\"}}";
        let intent = LlmIntentRecognizer::parse(raw).unwrap();
        assert_eq!(intent.arguments["song_name"], "set {live}");
    }

    #[test]
    fn test_parse_handles_escaped_quote_in_string() {
        let raw = "{\"intent\": \"play_music\", \"arguments\": {\"song_name\": \"say \\\"hi\\\" {\"}}";
        let intent = LlmIntentRecognizer::parse(raw).unwrap();
        assert_eq!(intent.arguments["song_name"], "say \"hi\" {");
    }

    #[test]
    fn test_parse_unclosed_object_is_none() {
        assert!(LlmIntentRecognizer::parse("{\"intent\": \"play_music\"").is_none());
    }

    #[test]
    fn test_parse_continue_chat_is_none() {
        assert!(LlmIntentRecognizer::parse("{\"intent\": \"continue_chat\"}").is_none());
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(LlmIntentRecognizer::parse("no json here").is_none());
    }
}
