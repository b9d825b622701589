//! Provider adapters for the voice fleet engine
//!
//! Baseline implementations of the core ports. Vendor-specific adapters
//! plug in the same way; the engine only ever sees the traits.
//!
//! - [`EnergyVad`] — threshold VAD over PCM16 (payload-size heuristic for
//!   Opus, whose DTX silence packets are a few bytes)
//! - [`OpenAiChatLlm`] — streaming chat against any OpenAI-compatible
//!   endpoint, tool calls included
//! - [`LlmIntentRecognizer`] — `intent_llm` mode classification
//! - [`InMemoryMemory`] — summarizing session memory kept in-process
//! - [`ScriptedAsr`], [`ScriptedLlm`], [`ScriptedTts`] — deterministic
//!   adapters used by the test suites and for bring-up without vendors

pub mod intent;
pub mod llm;
pub mod memory;
pub mod scripted;
pub mod vad;

pub use intent::LlmIntentRecognizer;
pub use llm::{OpenAiChatLlm, OpenAiLlmConfig};
pub use memory::InMemoryMemory;
pub use scripted::{ScriptedAsr, ScriptedLlm, ScriptedTts, ScriptedTurn};
pub use vad::{EnergyVad, EnergyVadConfig};
