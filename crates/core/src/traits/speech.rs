//! Speech processing ports: VAD, ASR, TTS

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::audio::AudioFrame;
use crate::error::Result;

/// Stream of synthesized audio frames
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<AudioFrame>> + Send>>;

/// Verdict of the VAD for a single frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadVerdict {
    pub is_voice: bool,
    /// Speech probability (0.0 - 1.0); energy-based detectors approximate
    pub probability: f32,
}

impl VadVerdict {
    pub fn voice(probability: f32) -> Self {
        Self {
            is_voice: true,
            probability,
        }
    }

    pub fn silence(probability: f32) -> Self {
        Self {
            is_voice: false,
            probability,
        }
    }
}

/// Voice activity detection port
///
/// Session-scoped: one instance per session so detectors can keep smoothing
/// state. Model weights shared between instances belong to the adapter.
#[async_trait]
pub trait VoiceActivityDetector: Send + Sync {
    /// Classify one frame
    async fn detect(&self, frame: &AudioFrame) -> Result<VadVerdict>;

    /// Drop internal state (new segment or after errors)
    fn reset(&self);

    /// Adapter name for logging
    fn name(&self) -> &str;
}

/// A recognition result, partial or final
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
}

impl Transcript {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence: 1.0,
        }
    }

    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence: 0.0,
        }
    }
}

/// Streaming speech recognition port
///
/// Session-scoped. The audio service pushes every frame of a segment along
/// with the VAD verdict; `finalize` is called when the segment closes and
/// must return the final transcript for everything fed since the last
/// `reset`.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Feed one frame; may yield an intermediate partial
    async fn feed(&self, frame: &AudioFrame, vad: &VadVerdict) -> Result<Option<Transcript>>;

    /// Close the current segment and return the final transcript
    async fn finalize(&self) -> Result<Transcript>;

    /// Drop segment state without producing a transcript
    fn reset(&self);

    /// Adapter name for logging
    fn name(&self) -> &str;
}

/// Text-to-speech port
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one sentence; frames must arrive in playback order
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioStream>;

    /// Adapter name for logging
    fn name(&self) -> &str;
}
