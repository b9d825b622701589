//! Per-session agent configuration
//!
//! Loaded once through the configuration port when a session starts and
//! immutable afterwards. Binds the session to a set of providers, a system
//! prompt, and a voice.

use serde::{Deserialize, Serialize};

/// How user intent is recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntentMode {
    /// Everything goes straight to dialogue
    #[default]
    Nointent,
    /// A separate LLM call classifies the utterance before dialogue
    IntentLlm,
    /// Intent recognition happens inline via tool schemas
    FunctionCall,
}

/// How conversation memory behaves at teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    /// No memory port is consulted
    #[default]
    Off,
    /// History is summarized into the memory store at session end
    Summarize,
}

/// DI names of the providers selected for each stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSelection {
    pub vad: String,
    pub asr: String,
    pub tts: String,
    pub llm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl Default for ProviderSelection {
    fn default() -> Self {
        Self {
            vad: "vad.energy".to_string(),
            asr: "asr.scripted".to_string(),
            tts: "tts.scripted".to_string(),
            llm: "llm.openai".to_string(),
            intent: None,
            memory: None,
        }
    }
}

/// Immutable per-session agent binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identifier from the console
    pub agent_id: String,
    /// System prompt for dialogue
    pub system_prompt: String,
    /// Provider selection per stage
    #[serde(default)]
    pub providers: ProviderSelection,
    #[serde(default)]
    pub intent_mode: IntentMode,
    #[serde(default)]
    pub memory_mode: MemoryMode,
    /// Voice id passed to the TTS provider
    #[serde(default = "default_voice")]
    pub voice_id: String,
    /// Reply template spoken after a wake word, when configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wakeup_reply: Option<String>,
    /// Per-agent override of the tool recursion bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_depth: Option<u32>,
}

fn default_voice() -> String {
    "default".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: "default".to_string(),
            system_prompt: "You are a friendly voice assistant. Keep answers short; they will be \
                            spoken aloud."
                .to_string(),
            providers: ProviderSelection::default(),
            intent_mode: IntentMode::default(),
            memory_mode: MemoryMode::default(),
            voice_id: default_voice(),
            wakeup_reply: None,
            max_tool_depth: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let cfg: AgentConfig = serde_json::from_str(
            r#"{"agent_id":"a1","system_prompt":"hi","intent_mode":"function_call"}"#,
        )
        .unwrap();
        assert_eq!(cfg.agent_id, "a1");
        assert_eq!(cfg.intent_mode, IntentMode::FunctionCall);
        assert_eq!(cfg.providers.llm, "llm.openai");
        assert_eq!(cfg.voice_id, "default");
    }
}
