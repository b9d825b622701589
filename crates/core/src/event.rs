//! Session events and control enums
//!
//! Events are the only way pipeline stages talk to each other. Every event
//! carries the session id it belongs to; handlers resolve session state
//! through the container rather than holding back-references.

use serde::{Deserialize, Serialize};

use crate::audio::AudioFrame;

/// How the client wants speech segmentation driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListenMode {
    /// Server-side VAD opens and closes segments
    #[default]
    Auto,
    /// Client sends explicit listen start/stop
    Manual,
    /// Continuous recognition, client streams at all times
    Realtime,
}

/// Why an abort was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Barge-in: user spoke while the engine was speaking
    UserInterrupt,
    /// Explicit `abort` frame from the client
    ClientRequest,
    /// A provider failed mid-utterance
    ProviderFailure,
    /// Session is being torn down
    Shutdown,
}

/// Why a session is closing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ClientClosed,
    InactivityTimeout,
    TransportError,
    ConfigurationError,
    ServerShutdown,
}

/// Events published on the session bus
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session finished its handshake and is live
    SessionStarted { session_id: String },
    /// Session teardown has begun
    SessionClosing {
        session_id: String,
        reason: CloseReason,
    },
    /// Raw text frame arrived from the transport (JSON not yet parsed)
    TextMessageReceived { session_id: String, raw: String },
    /// An audio frame arrived from the transport
    AudioDataReceived {
        session_id: String,
        frame: AudioFrame,
    },
    /// VAD saw a silence-to-voice transition
    SpeechDetected { session_id: String },
    /// The current speech segment closed
    SpeechEnded { session_id: String },
    /// ASR produced text for the segment
    TextRecognized {
        session_id: String,
        text: String,
        is_final: bool,
    },
    /// Stop speaking and cancel in-flight generation
    AbortRequest {
        session_id: String,
        reason: AbortReason,
    },
    /// An utterance bracket opened (engine started speaking)
    TtsStart { session_id: String, sentence_id: u64 },
    /// An utterance bracket closed
    TtsEnd { session_id: String, sentence_id: u64 },
}

/// Discriminant used for bus subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStarted,
    SessionClosing,
    TextMessageReceived,
    AudioDataReceived,
    SpeechDetected,
    SpeechEnded,
    TextRecognized,
    AbortRequest,
    TtsStart,
    TtsEnd,
}

impl SessionEvent {
    /// Discriminant for subscription lookup
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::SessionStarted { .. } => EventKind::SessionStarted,
            SessionEvent::SessionClosing { .. } => EventKind::SessionClosing,
            SessionEvent::TextMessageReceived { .. } => EventKind::TextMessageReceived,
            SessionEvent::AudioDataReceived { .. } => EventKind::AudioDataReceived,
            SessionEvent::SpeechDetected { .. } => EventKind::SpeechDetected,
            SessionEvent::SpeechEnded { .. } => EventKind::SpeechEnded,
            SessionEvent::TextRecognized { .. } => EventKind::TextRecognized,
            SessionEvent::AbortRequest { .. } => EventKind::AbortRequest,
            SessionEvent::TtsStart { .. } => EventKind::TtsStart,
            SessionEvent::TtsEnd { .. } => EventKind::TtsEnd,
        }
    }

    /// The session this event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::SessionStarted { session_id }
            | SessionEvent::SessionClosing { session_id, .. }
            | SessionEvent::TextMessageReceived { session_id, .. }
            | SessionEvent::AudioDataReceived { session_id, .. }
            | SessionEvent::SpeechDetected { session_id }
            | SessionEvent::SpeechEnded { session_id }
            | SessionEvent::TextRecognized { session_id, .. }
            | SessionEvent::AbortRequest { session_id, .. }
            | SessionEvent::TtsStart { session_id, .. }
            | SessionEvent::TtsEnd { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let ev = SessionEvent::SpeechDetected {
            session_id: "s1".into(),
        };
        assert_eq!(ev.kind(), EventKind::SpeechDetected);
        assert_eq!(ev.session_id(), "s1");
    }

    #[test]
    fn test_listen_mode_wire_format() {
        assert_eq!(
            serde_json::from_str::<ListenMode>("\"manual\"").unwrap(),
            ListenMode::Manual
        );
        assert_eq!(
            serde_json::to_string(&ListenMode::Realtime).unwrap(),
            "\"realtime\""
        );
    }
}
