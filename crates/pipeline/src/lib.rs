//! Real-time audio pipeline: VAD segmentation in, ordered speech out
//!
//! - [`AudioProcessingService`] consumes `AudioDataReceived`, drives the
//!   speech segmentation state machine, and feeds the session ASR adapter.
//! - [`TtsOrchestrator`] consumes sentence units and guarantees the
//!   transport sees audio in enqueue order, with barge-in draining.

pub mod audio_service;
pub mod tts_orchestrator;

pub use audio_service::{AudioProcessingService, AudioServiceConfig};
pub use tts_orchestrator::TtsOrchestrator;

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("session {0} is not open in the pipeline")]
    SessionNotOpen(String),

    #[error("speech output queue for session {0} is closed")]
    QueueClosed(String),

    #[error(transparent)]
    Runtime(#[from] voice_fleet_runtime::RuntimeError),

    #[error(transparent)]
    Core(#[from] voice_fleet_core::Error),
}
