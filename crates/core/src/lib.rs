//! Core types and ports for the voice fleet engine
//!
//! This crate provides the foundational types used across all other crates:
//! - Provider ports (VAD, ASR, TTS, LLM, intent, memory, transport)
//! - Audio frame types
//! - Session events and control enums
//! - Conversation history and chat message types
//! - Sentence units for ordered speech output
//! - Error types

pub mod action;
pub mod agent_config;
pub mod audio;
pub mod conversation;
pub mod error;
pub mod event;
pub mod llm;
pub mod sentence;
pub mod traits;

pub use action::{Action, ActionResponse};
pub use agent_config::{AgentConfig, IntentMode, MemoryMode, ProviderSelection};
pub use audio::{AudioCodec, AudioFrame};
pub use conversation::{ConversationHistory, Turn, TurnRole};
pub use error::{Error, Result};
pub use event::{AbortReason, CloseReason, EventKind, ListenMode, SessionEvent};
pub use llm::{ChatRequest, FinishReason, LlmChunk, Message, Role, ToolCall, ToolDefinition};
pub use sentence::{SentenceContent, SentenceType, SentenceUnit};

pub use traits::{
    AgentConfigProvider,
    AudioStream,
    ChunkStream,
    DetectedIntent,
    IntentRecognizer,
    LanguageModel,
    Memory,
    Outbound,
    SpeechRecognizer,
    SpeechSynthesizer,
    Transcript,
    VadVerdict,
    VoiceActivityDetector,
};
