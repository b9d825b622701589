//! Dialogue orchestration: recognized text in, ordered speech out
//!
//! [`DialogueService`] owns the LLM turn loop — memory recall, streaming
//! generation, tool dispatch with bounded recursion, and the sentence
//! bracketing contract (exactly one TtsStart/TtsEnd pair per user turn).
//! [`IntentService`] routes utterances in `intent_llm` mode before the
//! chat model is involved.

pub mod intent;
pub mod sentence;
pub mod service;

pub use intent::IntentService;
pub use sentence::SentenceSplitter;
pub use service::{DialogueConfig, DialogueService};

use thiserror::Error;

/// Dialogue errors
#[derive(Error, Debug)]
pub enum DialogueError {
    #[error(transparent)]
    Core(#[from] voice_fleet_core::Error),

    #[error(transparent)]
    Pipeline(#[from] voice_fleet_pipeline::PipelineError),

    #[error(transparent)]
    Runtime(#[from] voice_fleet_runtime::RuntimeError),
}
