//! Outbound transport port

use async_trait::async_trait;

use crate::audio::AudioFrame;
use crate::error::Result;

/// Writer side of a device connection
///
/// Implemented by the server's connection registry. Sends to one session are
/// serialized by a per-session lock inside the implementation; errors
/// propagate to the caller, which decides whether to tear the session down.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Send a JSON control frame
    async fn send_json(&self, session_id: &str, payload: serde_json::Value) -> Result<()>;

    /// Send a binary audio frame
    async fn send_audio(&self, session_id: &str, frame: AudioFrame) -> Result<()>;

    /// Whether the session still has a live connection
    fn is_connected(&self, session_id: &str) -> bool;
}
