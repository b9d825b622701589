//! Streaming chat against an OpenAI-compatible endpoint
//!
//! Works with Ollama, vLLM, and hosted gateways that speak the
//! `/chat/completions` SSE protocol. Tool-call deltas are assembled into
//! whole calls before they are yielded.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use voice_fleet_core::{
    ChatRequest, ChunkStream, Error, FinishReason, LanguageModel, LlmChunk, Message, Result, Role,
    ToolCall, ToolDefinition,
};

/// Endpoint configuration
#[derive(Debug, Clone)]
pub struct OpenAiLlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for OpenAiLlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "qwen3:4b-instruct".to_string(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// OpenAI-compatible streaming chat adapter
pub struct OpenAiChatLlm {
    client: reqwest::Client,
    config: OpenAiLlmConfig,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    r#type: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    r#type: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Deserialize)]
struct WireChunk {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCallDelta>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize, Default)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl OpenAiChatLlm {
    pub fn new(config: OpenAiLlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::provider("llm", format!("http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                },
                content: m.content.clone(),
                tool_call_id: m.tool_call_id.clone(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        r#type: "function",
                        function: WireFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect(),
            })
            .collect()
    }

    fn finish_reason(raw: Option<&str>) -> FinishReason {
        match raw {
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some(_) | None => FinishReason::Stop,
        }
    }

    fn assemble(pending: BTreeMap<usize, PendingCall>) -> Vec<ToolCall> {
        pending
            .into_values()
            .filter(|c| !c.name.is_empty())
            .map(|c| {
                let arguments = serde_json::from_str(&c.arguments)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                ToolCall::new(c.id, c.name, arguments)
            })
            .collect()
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatLlm {
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream> {
        let body = WireRequest {
            model: &self.config.model,
            messages: Self::wire_messages(&request.messages),
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    r#type: "function",
                    function: t,
                })
                .collect(),
        };

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(&body);
        if let Some(key) = &self.config.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| Error::provider("llm", format!("request: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::provider(
                "llm",
                format!("endpoint returned {}", response.status()),
            ));
        }

        let mut body_stream = response.bytes_stream();
        let stream = try_stream! {
            let mut buffer = String::new();
            let mut pending: BTreeMap<usize, PendingCall> = BTreeMap::new();
            let mut finish = FinishReason::Stop;

            'outer: while let Some(chunk) = body_stream.next().await {
                let chunk = chunk.map_err(|e| Error::provider("llm", format!("stream: {}", e)))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else { continue };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    let parsed: WireChunk = match serde_json::from_str(data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping undecodable SSE line");
                            continue;
                        }
                    };

                    for choice in parsed.choices {
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty() {
                                yield LlmChunk::Text(content);
                            }
                        }
                        for delta in choice.delta.tool_calls {
                            let slot = pending.entry(delta.index).or_default();
                            if let Some(id) = delta.id {
                                slot.id = id;
                            }
                            if let Some(function) = delta.function {
                                if let Some(name) = function.name {
                                    slot.name.push_str(&name);
                                }
                                if let Some(arguments) = function.arguments {
                                    slot.arguments.push_str(&arguments);
                                }
                            }
                        }
                        if let Some(reason) = choice.finish_reason {
                            finish = Self::finish_reason(Some(&reason));
                        }
                    }
                }
            }

            for call in Self::assemble(pending) {
                yield LlmChunk::ToolCall(call);
            }
            yield LlmChunk::Done(finish);
        };

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_joins_argument_deltas() {
        let mut pending = BTreeMap::new();
        pending.insert(
            0,
            PendingCall {
                id: "call_1".to_string(),
                name: "play_music".to_string(),
                arguments: "{\"song_name\":\"ja".to_string(),
            },
        );
        pending.get_mut(&0).unwrap().arguments.push_str("zz\"}");

        let calls = OpenAiChatLlm::assemble(pending);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].get_str("song_name"), Some("jazz"));
    }

    #[test]
    fn test_assemble_drops_nameless_fragments() {
        let mut pending = BTreeMap::new();
        pending.insert(0, PendingCall::default());
        assert!(OpenAiChatLlm::assemble(pending).is_empty());
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(
            OpenAiChatLlm::finish_reason(Some("tool_calls")),
            FinishReason::ToolCalls
        );
        assert_eq!(OpenAiChatLlm::finish_reason(None), FinishReason::Stop);
    }

    #[test]
    fn test_wire_messages_carry_tool_results() {
        let messages = vec![
            Message::assistant_tool_calls(vec![ToolCall::new(
                "call_1",
                "get_time",
                serde_json::json!({}),
            )]),
            Message::tool("{\"time\":\"12:00\"}", "call_1"),
        ];
        let wire = OpenAiChatLlm::wire_messages(&messages);
        assert_eq!(wire[0].tool_calls.len(), 1);
        assert_eq!(wire[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(wire[1].role, "tool");
    }
}
