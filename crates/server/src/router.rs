//! Inbound frame classification
//!
//! Every frame touches the session's activity clock, then becomes a typed
//! event on the bus: text frames as `TextMessageReceived` (JSON is parsed
//! downstream), binary frames as `AudioDataReceived`. Gateway sessions
//! carry a 16-byte audio header that is stripped here.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use voice_fleet_config::constants::{
    GATEWAY_HEADER_LEN, GATEWAY_LENGTH_RANGE, GATEWAY_TIMESTAMP_RANGE,
};
use voice_fleet_core::{AudioFrame, SessionEvent};
use voice_fleet_runtime::{DiContainer, EventBus, SessionContext, CONTEXT_SERVICE};

/// Classifies inbound frames and publishes typed events
pub struct MessageRouter {
    bus: Arc<EventBus>,
    container: Arc<DiContainer>,
    sequences: DashMap<String, AtomicU64>,
}

impl MessageRouter {
    pub fn new(bus: Arc<EventBus>, container: Arc<DiContainer>) -> Self {
        Self {
            bus,
            container,
            sequences: DashMap::new(),
        }
    }

    fn context(&self, session_id: &str) -> Option<Arc<SessionContext>> {
        self.container
            .resolve_session::<Arc<SessionContext>>(session_id, CONTEXT_SERVICE)
            .ok()
    }

    /// Route an inbound text frame
    pub async fn route_text(&self, session_id: &str, raw: String) {
        let Some(ctx) = self.context(session_id) else {
            tracing::debug!(session_id = %session_id, "text frame for unknown session dropped");
            return;
        };
        ctx.touch();
        self.bus
            .publish(SessionEvent::TextMessageReceived {
                session_id: session_id.to_string(),
                raw,
            })
            .await;
    }

    /// Route an inbound binary frame
    pub async fn route_binary(&self, session_id: &str, data: Vec<u8>) {
        let Some(ctx) = self.context(session_id) else {
            tracing::debug!(session_id = %session_id, "audio frame for unknown session dropped");
            return;
        };
        ctx.touch();

        let (payload, timestamp_ms) = if ctx.from_gateway && data.len() >= GATEWAY_HEADER_LEN {
            Self::parse_gateway_frame(&data)
        } else {
            (data, None)
        };
        if payload.is_empty() {
            return;
        }

        let sequence = self
            .sequences
            .entry(session_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        let mut frame = AudioFrame::new(payload, ctx.audio_format(), sequence);
        if let Some(ts) = timestamp_ms {
            frame = frame.with_timestamp_ms(ts);
        }

        self.bus
            .publish(SessionEvent::AudioDataReceived {
                session_id: session_id.to_string(),
                frame,
            })
            .await;
    }

    /// Strip the gateway header: bytes [0..8) reserved, [8..12) big-endian
    /// timestamp in milliseconds, [12..16) big-endian audio length
    fn parse_gateway_frame(data: &[u8]) -> (Vec<u8>, Option<u64>) {
        let timestamp = u32::from_be_bytes(
            data[GATEWAY_TIMESTAMP_RANGE].try_into().expect("4 bytes"),
        ) as u64;
        let declared_len = u32::from_be_bytes(
            data[GATEWAY_LENGTH_RANGE].try_into().expect("4 bytes"),
        ) as usize;

        let body = &data[GATEWAY_HEADER_LEN..];
        let take = declared_len.min(body.len());
        if declared_len > body.len() {
            tracing::warn!(
                declared = declared_len,
                actual = body.len(),
                "gateway frame shorter than declared length"
            );
        }
        (body[..take].to_vec(), Some(timestamp))
    }

    /// Drop per-session routing state
    pub fn close_session(&self, session_id: &str) {
        self.sequences.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_header_parse() {
        let mut data = vec![0u8; 16];
        data[8..12].copy_from_slice(&1234u32.to_be_bytes());
        data[12..16].copy_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(&[9, 9, 9, 9, 7, 7]); // 4 audio bytes + junk

        let (payload, ts) = MessageRouter::parse_gateway_frame(&data);
        assert_eq!(payload, vec![9, 9, 9, 9]);
        assert_eq!(ts, Some(1234));
    }

    #[test]
    fn test_gateway_header_truncated_body() {
        let mut data = vec![0u8; 16];
        data[12..16].copy_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(&[1, 2]);

        let (payload, _) = MessageRouter::parse_gateway_frame(&data);
        assert_eq!(payload, vec![1, 2]);
    }
}
