//! Energy-threshold voice activity detection
//!
//! Good enough for segmentation against close-talking device microphones;
//! neural detectors implement the same port.

use async_trait::async_trait;
use parking_lot::Mutex;

use voice_fleet_core::{AudioCodec, AudioFrame, Result, VadVerdict, VoiceActivityDetector};

/// EnergyVad tuning
#[derive(Debug, Clone)]
pub struct EnergyVadConfig {
    /// Frames at or above this dBFS level count as voice
    pub threshold_db: f32,
    /// Opus payloads at or above this size count as voice (DTX silence
    /// packets are a few bytes)
    pub min_opus_payload: usize,
    /// Consecutive voice frames required before reporting voice
    pub min_voice_frames: u32,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            threshold_db: -45.0,
            min_opus_payload: 10,
            min_voice_frames: 2,
        }
    }
}

/// Per-session energy detector
pub struct EnergyVad {
    config: EnergyVadConfig,
    voice_streak: Mutex<u32>,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        Self {
            config,
            voice_streak: Mutex::new(0),
        }
    }

    pub fn default_config() -> Self {
        Self::new(EnergyVadConfig::default())
    }

    fn frame_is_loud(&self, frame: &AudioFrame) -> (bool, f32) {
        match frame.codec {
            AudioCodec::Opus => {
                let loud = frame.len() >= self.config.min_opus_payload;
                (loud, if loud { 0.8 } else { 0.1 })
            }
            _ => match frame.energy_db() {
                Some(db) => {
                    let loud = db >= self.config.threshold_db;
                    // Map dB headroom above threshold onto (0, 1].
                    let headroom = (db - self.config.threshold_db).clamp(0.0, 30.0);
                    let probability = if loud { 0.5 + headroom / 60.0 } else { 0.1 };
                    (loud, probability)
                }
                None => (false, 0.0),
            },
        }
    }
}

#[async_trait]
impl VoiceActivityDetector for EnergyVad {
    async fn detect(&self, frame: &AudioFrame) -> Result<VadVerdict> {
        let (loud, probability) = self.frame_is_loud(frame);
        let mut streak = self.voice_streak.lock();
        if loud {
            *streak += 1;
        } else {
            *streak = 0;
        }
        if *streak >= self.config.min_voice_frames {
            Ok(VadVerdict::voice(probability))
        } else {
            Ok(VadVerdict::silence(probability))
        }
    }

    fn reset(&self) {
        *self.voice_streak.lock() = 0;
    }

    fn name(&self) -> &str {
        "energy-vad"
    }
}
