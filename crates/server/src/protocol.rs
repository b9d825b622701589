//! Device wire protocol
//!
//! Text frames are JSON objects discriminated by `type`. Binary frames are
//! encoded audio; MQTT-gateway sessions prefix them with a 16-byte header.

use serde::{Deserialize, Serialize};

use voice_fleet_config::AudioSettings;
use voice_fleet_core::ListenMode;

/// Client listen control states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenState {
    Start,
    Stop,
    Detect,
}

/// Audio parameters exchanged in `hello`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioParams {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
    #[serde(default = "default_frame_duration")]
    pub frame_duration: u32,
}

fn default_format() -> String {
    "opus".to_string()
}
fn default_sample_rate() -> u32 {
    16_000
}
fn default_channels() -> u8 {
    1
}
fn default_frame_duration() -> u32 {
    60
}

/// Inbound text frames
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Hello {
        #[serde(default)]
        audio_params: Option<AudioParams>,
        #[serde(default)]
        features: serde_json::Map<String, serde_json::Value>,
    },
    Listen {
        state: ListenState,
        #[serde(default)]
        mode: Option<ListenMode>,
        #[serde(default)]
        text: Option<String>,
    },
    Abort {
        #[serde(default)]
        reason: Option<String>,
    },
    Iot {
        #[serde(default)]
        descriptors: Option<serde_json::Value>,
        #[serde(default)]
        states: Option<serde_json::Value>,
    },
    Mcp {
        payload: serde_json::Value,
    },
    Server {
        action: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// `hello` reply sent after a successful handshake
pub fn hello_reply(session_id: &str, audio: &AudioSettings) -> serde_json::Value {
    serde_json::json!({
        "type": "hello",
        "transport": "websocket",
        "session_id": session_id,
        "audio_params": {
            "format": audio.format,
            "sample_rate": audio.sample_rate,
            "channels": audio.channels,
            "frame_duration": audio.frame_duration_ms,
        }
    })
}

/// Close notice sent when the server tears a session down
pub fn goodbye(session_id: &str, reason: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "goodbye",
        "session_id": session_id,
        "reason": reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_parses() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"type":"hello","audio_params":{"format":"opus","sample_rate":16000,
                "channels":1,"frame_duration":60},"features":{"mcp":true}}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::Hello {
                audio_params,
                features,
            } => {
                assert_eq!(audio_params.unwrap().sample_rate, 16_000);
                assert_eq!(features.get("mcp"), Some(&serde_json::json!(true)));
            }
            other => panic!("expected hello, got {:?}", other),
        }
    }

    #[test]
    fn test_listen_detect_with_text() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"type":"listen","state":"detect","text":"hey assistant"}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::Listen { state, mode, text } => {
                assert_eq!(state, ListenState::Detect);
                assert!(mode.is_none());
                assert_eq!(text.as_deref(), Some("hey assistant"));
            }
            other => panic!("expected listen, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let result = serde_json::from_str::<InboundMessage>(r#"{"type":"telepathy"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_hello_reply_shape() {
        let reply = hello_reply("s1", &AudioSettings::default());
        assert_eq!(reply["type"], "hello");
        assert_eq!(reply["session_id"], "s1");
        assert_eq!(reply["audio_params"]["sample_rate"], 24_000);
    }
}
