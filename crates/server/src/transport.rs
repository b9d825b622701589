//! Connection registry and outbound sending
//!
//! One registered sink per session. All sends to a session are serialized
//! by its sink mutex, the only mandatory lock in the engine. Send errors
//! propagate; the caller decides whether to tear the session down.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use voice_fleet_core::{AudioFrame, Error, Outbound, Result};

/// Writer half of one device connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()>;
    async fn send_ping(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

struct Connection {
    sink: Mutex<Box<dyn FrameSink>>,
    gateway: bool,
}

/// Session id → connection map
#[derive(Default)]
pub struct Transport {
    connections: DashMap<String, Arc<Connection>>,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to a session
    pub fn register(&self, session_id: &str, sink: Box<dyn FrameSink>, gateway: bool) {
        self.connections.insert(
            session_id.to_string(),
            Arc::new(Connection {
                sink: Mutex::new(sink),
                gateway,
            }),
        );
        tracing::debug!(session_id = %session_id, gateway = gateway, "connection registered");
    }

    /// Detach and close a session's connection
    pub async fn unregister(&self, session_id: &str) {
        if let Some((_, connection)) = self.connections.remove(session_id) {
            let mut sink = connection.sink.lock().await;
            if let Err(e) = sink.close().await {
                tracing::debug!(session_id = %session_id, error = %e, "close notification failed");
            }
        }
    }

    /// Whether the session arrived via the MQTT gateway
    pub fn is_gateway(&self, session_id: &str) -> bool {
        self.connections
            .get(session_id)
            .map(|c| c.gateway)
            .unwrap_or(false)
    }

    /// Send a protocol-level ping (heartbeat)
    pub async fn ping(&self, session_id: &str) -> Result<()> {
        let connection = self.connection(session_id)?;
        let mut sink = connection.sink.lock().await;
        sink.send_ping().await
    }

    fn connection(&self, session_id: &str) -> Result<Arc<Connection>> {
        self.connections
            .get(session_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| Error::NotConnected(session_id.to_string()))
    }
}

#[async_trait]
impl Outbound for Transport {
    async fn send_json(&self, session_id: &str, payload: serde_json::Value) -> Result<()> {
        let connection = self.connection(session_id)?;
        let text = serde_json::to_string(&payload)?;
        let mut sink = connection.sink.lock().await;
        sink.send_text(text).await
    }

    async fn send_audio(&self, session_id: &str, frame: AudioFrame) -> Result<()> {
        let connection = self.connection(session_id)?;
        let mut sink = connection.sink.lock().await;
        sink.send_binary(frame.payload.to_vec()).await
    }

    fn is_connected(&self, session_id: &str) -> bool {
        self.connections.contains_key(session_id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    /// Records everything a session was sent
    #[derive(Default)]
    pub struct RecordingSinkState {
        pub texts: SyncMutex<Vec<String>>,
        pub binaries: SyncMutex<Vec<Vec<u8>>>,
        pub closed: SyncMutex<bool>,
    }

    pub struct RecordingSink {
        pub state: Arc<RecordingSinkState>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_text(&mut self, text: String) -> Result<()> {
            self.state.texts.lock().push(text);
            Ok(())
        }

        async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
            self.state.binaries.lock().push(data);
            Ok(())
        }

        async fn send_ping(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            *self.state.closed.lock() = true;
            Ok(())
        }
    }
}
