//! Audio frame types and utilities

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Audio codecs the engine passes through or inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// Opus packets (device default, passed through opaquely)
    #[default]
    Opus,
    /// 16-bit signed PCM (little-endian)
    Pcm16,
    /// 32-bit float PCM
    PcmF32,
}

impl AudioCodec {
    /// Parse from the wire name used in `hello` frames
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "opus" => Some(AudioCodec::Opus),
            "pcm" | "pcm16" => Some(AudioCodec::Pcm16),
            "pcm_f32" => Some(AudioCodec::PcmF32),
            _ => None,
        }
    }

    /// Wire name used in `hello` frames
    pub fn wire_name(&self) -> &'static str {
        match self {
            AudioCodec::Opus => "opus",
            AudioCodec::Pcm16 => "pcm",
            AudioCodec::PcmF32 => "pcm_f32",
        }
    }
}

/// A single audio frame with transport metadata
///
/// The payload is kept encoded; providers that need samples decode it
/// themselves. Frames are cheap to clone.
#[derive(Clone)]
pub struct AudioFrame {
    /// Encoded audio payload
    pub payload: Arc<[u8]>,
    /// Codec of the payload
    pub codec: AudioCodec,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u8,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Capture timestamp in milliseconds, when the gateway supplied one
    pub timestamp_ms: Option<u64>,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("payload_len", &self.payload.len())
            .field("codec", &self.codec)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}

impl AudioFrame {
    /// Create a new frame with default device parameters (16 kHz mono)
    pub fn new(payload: Vec<u8>, codec: AudioCodec, sequence: u64) -> Self {
        Self {
            payload: payload.into(),
            codec,
            sample_rate: 16_000,
            channels: 1,
            sequence,
            timestamp_ms: None,
        }
    }

    /// Attach a gateway capture timestamp
    pub fn with_timestamp_ms(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Set sample rate
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Iterate PCM16 samples, if the codec carries them
    pub fn pcm16_samples(&self) -> Option<impl Iterator<Item = i16> + '_> {
        match self.codec {
            AudioCodec::Pcm16 => Some(
                self.payload
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]])),
            ),
            _ => None,
        }
    }

    /// RMS energy in dBFS for PCM16 payloads
    ///
    /// Returns `None` for encoded codecs; energy-based VAD only applies to
    /// raw PCM input.
    pub fn energy_db(&self) -> Option<f32> {
        let samples = self.pcm16_samples()?;
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for s in samples {
            let norm = s as f64 / i16::MAX as f64;
            sum += norm * norm;
            count += 1;
        }
        if count == 0 {
            return Some(f32::NEG_INFINITY);
        }
        let rms = (sum / count as f64).sqrt();
        if rms <= f64::EPSILON {
            Some(f32::NEG_INFINITY)
        } else {
            Some((20.0 * rms.log10()) as f32)
        }
    }

    /// Frame duration in milliseconds for PCM payloads
    pub fn duration_ms(&self) -> Option<u64> {
        let bytes_per_sample = match self.codec {
            AudioCodec::Pcm16 => 2,
            AudioCodec::PcmF32 => 4,
            AudioCodec::Opus => return None,
        };
        let samples = self.payload.len() / (bytes_per_sample * self.channels as usize);
        Some(samples as u64 * 1000 / self.sample_rate as u64)
    }
}
