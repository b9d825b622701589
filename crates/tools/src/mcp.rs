//! Device-side tool protocol
//!
//! Clients that declare `features.mcp` in their hello expose their own
//! functions over JSON-RPC framed in `mcp` text messages. The engine sends
//! `initialize` and `tools/list` after the handshake, registers whatever
//! comes back as session tools, and forwards `tools/call` invocations to
//! the device, matching responses by request id.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use voice_fleet_core::{ActionResponse, Outbound, ToolDefinition};

use crate::handler::SystemContext;
use crate::registry::{Tool, ToolKind};
use crate::ToolError;

/// Device tools answer within this window or fail
const DEVICE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC client over the session's `mcp` frames
pub struct McpDeviceClient {
    session_id: String,
    outbound: Arc<dyn Outbound>,
    pending: DashMap<u64, oneshot::Sender<serde_json::Value>>,
    next_id: AtomicU64,
}

impl McpDeviceClient {
    pub fn new(session_id: impl Into<String>, outbound: Arc<dyn Outbound>) -> Self {
        Self {
            session_id: session_id.into(),
            outbound,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let frame = serde_json::json!({
            "type": "mcp",
            "payload": {
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }
        });
        if let Err(e) = self.outbound.send_json(&self.session_id, frame).await {
            self.pending.remove(&id);
            return Err(ToolError::Execution(format!("mcp send: {}", e)));
        }

        match tokio::time::timeout(DEVICE_CALL_TIMEOUT, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(ToolError::Execution("mcp channel closed".into())),
            Err(_) => {
                self.pending.remove(&id);
                Err(ToolError::Timeout {
                    name: method.to_string(),
                    seconds: DEVICE_CALL_TIMEOUT.as_secs(),
                })
            }
        }
    }

    /// Kick off the device handshake and fetch its tool list
    pub async fn discover_tools(
        self: &Arc<Self>,
    ) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        let _ = self
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "voice-fleet", "version": env!("CARGO_PKG_VERSION")},
                }),
            )
            .await?;

        let listing = self.request("tools/list", serde_json::json!({})).await?;
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        if let Some(items) = listing.get("tools").and_then(|v| v.as_array()) {
            for item in items {
                let Some(name) = item.get("name").and_then(|v| v.as_str()) else {
                    continue;
                };
                let description = item
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Device-side function")
                    .to_string();
                let parameters = item
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"}));
                tools.push(Arc::new(DeviceTool {
                    definition: ToolDefinition::new(name, description, parameters),
                    client: self.clone(),
                }));
            }
        }
        tracing::info!(session_id = %self.session_id, count = tools.len(), "device tools discovered");
        Ok(tools)
    }

    /// Route an inbound `mcp` frame payload
    ///
    /// Responses resolve their pending request; anything else is logged and
    /// dropped.
    pub fn handle_frame(&self, payload: &serde_json::Value) {
        let Some(id) = payload.get("id").and_then(|v| v.as_u64()) else {
            tracing::debug!(session_id = %self.session_id, "mcp notification ignored");
            return;
        };
        if let Some((_, tx)) = self.pending.remove(&id) {
            let result = payload
                .get("result")
                .cloned()
                .unwrap_or_else(|| payload.get("error").cloned().unwrap_or_default());
            let _ = tx.send(result);
        } else {
            tracing::debug!(session_id = %self.session_id, id = id, "mcp response with no pending request");
        }
    }
}

/// A device-exported function wrapped as a session tool
struct DeviceTool {
    definition: ToolDefinition,
    client: Arc<McpDeviceClient>,
}

#[async_trait]
impl Tool for DeviceTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn kind(&self) -> ToolKind {
        ToolKind::UserFunction
    }

    async fn execute(
        &self,
        _system: Option<&SystemContext>,
        arguments: serde_json::Value,
    ) -> Result<ActionResponse, ToolError> {
        let result = self
            .client
            .request(
                "tools/call",
                serde_json::json!({
                    "name": self.definition.name,
                    "arguments": arguments,
                }),
            )
            .await?;

        // MCP wraps text output in a content list.
        let text = result
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|items| items.first())
            .and_then(|item| item.get("text"))
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .unwrap_or_else(|| result.to_string());

        Ok(ActionResponse::req_llm(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingOutbound {
        frames: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn send_json(
            &self,
            _session_id: &str,
            payload: serde_json::Value,
        ) -> voice_fleet_core::Result<()> {
            self.frames.lock().push(payload);
            Ok(())
        }

        async fn send_audio(
            &self,
            _session_id: &str,
            _frame: voice_fleet_core::AudioFrame,
        ) -> voice_fleet_core::Result<()> {
            Ok(())
        }

        fn is_connected(&self, _session_id: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let outbound = Arc::new(RecordingOutbound {
            frames: Mutex::new(Vec::new()),
        });
        let client = Arc::new(McpDeviceClient::new("s1", outbound.clone()));

        let pending = client.clone();
        let task = tokio::spawn(async move {
            pending.request("tools/list", serde_json::json!({})).await
        });

        // Wait for the outbound frame, then answer it like the device would.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = outbound.frames.lock().last().cloned().unwrap();
        let id = sent["payload"]["id"].as_u64().unwrap();
        client.handle_frame(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"tools": []}
        }));

        let result = task.await.unwrap().unwrap();
        assert_eq!(result["tools"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let outbound = Arc::new(RecordingOutbound {
            frames: Mutex::new(Vec::new()),
        });
        let client = McpDeviceClient::new("s1", outbound);
        // No pending request with this id; must not panic.
        client.handle_frame(&serde_json::json!({"id": 99, "result": {}}));
    }
}
