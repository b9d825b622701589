//! Control-frame handling
//!
//! Consumes `TextMessageReceived`, parses the JSON protocol, and applies
//! listen / abort / iot / mcp / server frames to the session. Malformed
//! JSON and unknown types are logged and dropped; the session continues.

use dashmap::DashMap;
use std::sync::Arc;

use voice_fleet_core::{
    AbortReason, AgentConfigProvider, EventKind, ListenMode, SessionEvent,
};
use voice_fleet_pipeline::{AudioProcessingService, TtsOrchestrator};
use voice_fleet_runtime::{DiContainer, EventBus, SessionContext, CONTEXT_SERVICE};
use voice_fleet_tools::{McpDeviceClient, ToolHandler};

use crate::protocol::{InboundMessage, ListenState};
use crate::transport::Transport;

/// Applies parsed control frames to session state
pub struct ControlService {
    container: Arc<DiContainer>,
    bus: Arc<EventBus>,
    audio: Arc<AudioProcessingService>,
    orchestrator: Arc<TtsOrchestrator>,
    tools: Arc<ToolHandler>,
    transport: Arc<Transport>,
    agent_provider: Arc<dyn AgentConfigProvider>,
    mcp_clients: DashMap<String, Arc<McpDeviceClient>>,
}

impl ControlService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        container: Arc<DiContainer>,
        bus: Arc<EventBus>,
        audio: Arc<AudioProcessingService>,
        orchestrator: Arc<TtsOrchestrator>,
        tools: Arc<ToolHandler>,
        transport: Arc<Transport>,
        agent_provider: Arc<dyn AgentConfigProvider>,
    ) -> Self {
        Self {
            container,
            bus,
            audio,
            orchestrator,
            tools,
            transport,
            agent_provider,
            mcp_clients: DashMap::new(),
        }
    }

    /// Subscribe the control handler on the bus
    pub fn register_handlers(self: &Arc<Self>, bus: &EventBus) {
        let service = self.clone();
        bus.subscribe_async(EventKind::TextMessageReceived, move |event| {
            let service = service.clone();
            Box::pin(async move {
                if let SessionEvent::TextMessageReceived { session_id, raw } = event {
                    service.on_text(&session_id, &raw).await;
                }
                Ok(())
            })
        });
    }

    fn context(&self, session_id: &str) -> Option<Arc<SessionContext>> {
        self.container
            .resolve_session::<Arc<SessionContext>>(session_id, CONTEXT_SERVICE)
            .ok()
    }

    /// Parse and apply one text frame
    pub async fn on_text(&self, session_id: &str, raw: &str) {
        let message: InboundMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                // Protocol error: drop the frame, keep the session.
                tracing::warn!(session_id = %session_id, error = %e, "malformed control frame dropped");
                return;
            }
        };
        let Some(ctx) = self.context(session_id) else {
            return;
        };

        match message {
            InboundMessage::Hello { .. } => {
                tracing::debug!(session_id = %session_id, "duplicate hello ignored");
            }
            InboundMessage::Listen { state, mode, text } => {
                self.on_listen(session_id, &ctx, state, mode, text).await;
            }
            InboundMessage::Abort { reason } => {
                tracing::info!(session_id = %session_id, reason = ?reason, "client abort");
                self.bus
                    .publish(SessionEvent::AbortRequest {
                        session_id: session_id.to_string(),
                        reason: AbortReason::ClientRequest,
                    })
                    .await;
            }
            InboundMessage::Iot {
                descriptors,
                states,
            } => {
                if let Some(descriptors) = descriptors {
                    ctx.add_iot_descriptor(descriptors);
                }
                if let Some(states) = states {
                    tracing::debug!(session_id = %session_id, states = %states, "iot state update");
                }
            }
            InboundMessage::Mcp { payload } => {
                if let Some(client) = self.mcp_clients.get(session_id) {
                    client.handle_frame(&payload);
                } else {
                    tracing::debug!(session_id = %session_id, "mcp frame without negotiated mcp");
                }
            }
            InboundMessage::Server { action, .. } => {
                self.on_server_action(session_id, &ctx, &action).await;
            }
        }
    }

    async fn on_listen(
        &self,
        session_id: &str,
        ctx: &Arc<SessionContext>,
        state: ListenState,
        mode: Option<ListenMode>,
        text: Option<String>,
    ) {
        if let Some(mode) = mode {
            ctx.set_listen_mode(mode);
        }
        match state {
            ListenState::Start => {
                ctx.set_client_have_voice(true);
                ctx.set_client_voice_stop(false);
            }
            ListenState::Stop => {
                ctx.set_client_voice_stop(true);
                if let Err(e) = self.audio.close_segment(session_id).await {
                    tracing::warn!(session_id = %session_id, error = %e, "manual segment close failed");
                }
            }
            ListenState::Detect => {
                ctx.set_just_woken_up(true);
                let wake_reply = ctx.agent().wakeup_reply.clone();
                match (wake_reply, text) {
                    (Some(reply), _) => {
                        if let Err(e) = self.orchestrator.say(session_id, &reply) {
                            tracing::warn!(session_id = %session_id, error = %e, "wake reply failed");
                        }
                    }
                    (None, Some(text)) if !text.trim().is_empty() => {
                        // The wake frame carried a query; treat it as input.
                        self.bus
                            .publish(SessionEvent::TextRecognized {
                                session_id: session_id.to_string(),
                                text,
                                is_final: true,
                            })
                            .await;
                    }
                    _ => {}
                }
            }
        }
    }

    async fn on_server_action(
        &self,
        session_id: &str,
        ctx: &Arc<SessionContext>,
        action: &str,
    ) {
        match action {
            "reload_config" => match self.agent_provider.fetch(&ctx.device_id).await {
                Ok(config) => {
                    let old = ctx.agent();
                    ctx.set_agent(Arc::new(config));
                    let fresh = ctx.agent();
                    // Invalidate swapped providers so the next resolve
                    // rebuilds them against the new selection.
                    for name in [
                        old.providers.vad.as_str(),
                        old.providers.asr.as_str(),
                        old.providers.tts.as_str(),
                        old.providers.llm.as_str(),
                    ] {
                        self.container.invalidate_session_service(session_id, name);
                    }
                    tracing::info!(
                        session_id = %session_id,
                        agent_id = %fresh.agent_id,
                        "agent configuration reloaded"
                    );
                }
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "config reload failed");
                }
            },
            other => {
                tracing::warn!(session_id = %session_id, action = %other, "unknown server action");
            }
        }
    }

    /// Negotiate the device tool protocol for a session that declared
    /// `features.mcp`: discovery runs as a tracked task and registers the
    /// device's functions into the session registry
    pub fn enable_mcp(&self, ctx: &Arc<SessionContext>) {
        let session_id = ctx.session_id.clone();
        let client = Arc::new(McpDeviceClient::new(
            session_id.clone(),
            self.transport.clone() as Arc<dyn voice_fleet_core::Outbound>,
        ));
        self.mcp_clients.insert(session_id.clone(), client.clone());

        let tools = self.tools.clone();
        let spawn_result = ctx.lifecycle().spawn("mcp-discovery", async move {
            match client.discover_tools().await {
                Ok(device_tools) => {
                    for tool in device_tools {
                        tools.register_tool(&session_id, tool);
                    }
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "mcp discovery failed");
                }
            }
        });
        if let Err(e) = spawn_result {
            tracing::warn!(error = %e, "mcp discovery not started");
        }
    }

    /// Drop per-session control state
    pub fn close_session(&self, session_id: &str) {
        self.mcp_clients.remove(session_id);
    }
}
