//! Provider ports
//!
//! Every pluggable stage of the pipeline sits behind one of these traits.
//! Adapters live in `voice-fleet-providers`; the engine resolves them from
//! the container by the names in [`crate::ProviderSelection`].

mod config;
mod intent;
mod llm;
mod memory;
mod speech;
mod transport;

pub use config::AgentConfigProvider;
pub use intent::{DetectedIntent, IntentRecognizer};
pub use llm::{ChunkStream, LanguageModel};
pub use memory::Memory;
pub use speech::{
    AudioStream, SpeechRecognizer, SpeechSynthesizer, Transcript, VadVerdict,
    VoiceActivityDetector,
};
pub use transport::Outbound;
