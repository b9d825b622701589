//! Session lifecycle
//!
//! Creates and destroys SessionContext + LifecycleManager pairs, keeps the
//! inactivity monitor running, and guarantees teardown order: close the
//! pipeline, stop tracked tasks, flush memory, drop the connection, purge
//! the container.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use voice_fleet_config::SessionSettings;
use voice_fleet_core::{
    AgentConfigProvider, CloseReason, EventKind, Memory, MemoryMode, Outbound, SessionEvent,
};
use voice_fleet_pipeline::{AudioProcessingService, TtsOrchestrator};
use voice_fleet_runtime::{
    DiContainer, EventBus, LifecycleManager, SessionContext, CONTEXT_SERVICE,
};
use voice_fleet_tools::ToolHandler;

use crate::control::ControlService;
use crate::protocol;
use crate::router::MessageRouter;
use crate::transport::Transport;
use crate::ServerError;

/// Creates, tracks, and destroys sessions
pub struct SessionManager {
    container: Arc<DiContainer>,
    bus: Arc<EventBus>,
    transport: Arc<Transport>,
    router: Arc<MessageRouter>,
    audio: Arc<AudioProcessingService>,
    orchestrator: Arc<TtsOrchestrator>,
    tools: Arc<ToolHandler>,
    control: Arc<ControlService>,
    agent_provider: Arc<dyn AgentConfigProvider>,
    settings: SessionSettings,
    sessions: DashMap<String, Arc<SessionContext>>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        container: Arc<DiContainer>,
        bus: Arc<EventBus>,
        transport: Arc<Transport>,
        router: Arc<MessageRouter>,
        audio: Arc<AudioProcessingService>,
        orchestrator: Arc<TtsOrchestrator>,
        tools: Arc<ToolHandler>,
        control: Arc<ControlService>,
        agent_provider: Arc<dyn AgentConfigProvider>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            container,
            bus,
            transport,
            router,
            audio,
            orchestrator,
            tools,
            control,
            agent_provider,
            settings,
            sessions: DashMap::new(),
        }
    }

    /// Let system tools end sessions by publishing `SessionClosing`
    pub fn register_handlers(self: &Arc<Self>, bus: &EventBus) {
        let manager = self.clone();
        bus.subscribe_async(EventKind::SessionClosing, move |event| {
            let manager = manager.clone();
            Box::pin(async move {
                if let SessionEvent::SessionClosing { session_id, reason } = event {
                    // No-op when destroy itself published the event.
                    if manager.sessions.contains_key(&session_id) {
                        // Detached on purpose: the publisher may be a task
                        // this very teardown is about to cancel.
                        tokio::spawn(async move {
                            manager.destroy_session(&session_id, reason).await;
                        });
                    }
                }
                Ok(())
            })
        });
    }

    /// Create a session: agent config, context, pipeline registration
    ///
    /// A failed config fetch is fatal for the session; the caller closes
    /// the connection with a diagnostic.
    pub async fn create_session(
        &self,
        device_id: &str,
        client_id: &str,
        client_ip: &str,
        from_gateway: bool,
    ) -> Result<Arc<SessionContext>, ServerError> {
        if self.sessions.len() >= self.settings.max_sessions {
            return Err(ServerError::Capacity(self.settings.max_sessions));
        }

        let agent = self
            .agent_provider
            .fetch(device_id)
            .await
            .map_err(|e| ServerError::Configuration(e.to_string()))?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let lifecycle = Arc::new(LifecycleManager::new(session_id.clone()));
        let ctx = Arc::new(SessionContext::new(
            session_id.clone(),
            device_id,
            client_id,
            client_ip,
            from_gateway,
            lifecycle,
        ));
        ctx.set_agent(Arc::new(agent));

        self.container
            .update_session_service(&session_id, CONTEXT_SERVICE, ctx.clone());
        self.audio.open_session(ctx.clone());
        self.orchestrator
            .open_session(ctx.clone())
            .map_err(|e| ServerError::Session(e.to_string()))?;
        self.tools.open_session(&session_id);
        self.sessions.insert(session_id.clone(), ctx.clone());

        metrics::gauge!("voice_fleet_sessions").increment(1.0);
        tracing::info!(
            session_id = %session_id,
            device_id = %device_id,
            client_ip = %client_ip,
            gateway = from_gateway,
            "session created"
        );

        self.bus
            .publish(SessionEvent::SessionStarted {
                session_id: session_id.clone(),
            })
            .await;
        Ok(ctx)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionContext>> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Tear a session down; safe to call twice
    pub async fn destroy_session(&self, session_id: &str, reason: CloseReason) {
        let Some((_, ctx)) = self.sessions.remove(session_id) else {
            return;
        };
        tracing::info!(session_id = %session_id, reason = ?reason, "destroying session");

        self.bus
            .publish(SessionEvent::SessionClosing {
                session_id: session_id.to_string(),
                reason,
            })
            .await;

        // Flush memory before the pipeline goes away.
        let agent = ctx.agent();
        if agent.memory_mode == MemoryMode::Summarize {
            let memory_name = agent
                .providers
                .memory
                .clone()
                .unwrap_or_else(|| "memory.inmemory".to_string());
            if let Ok(memory) = self.container.resolve::<Arc<dyn Memory>>(&memory_name) {
                let turns = ctx.history.snapshot();
                if let Err(e) = memory.store(&ctx.device_id, &turns).await {
                    tracing::warn!(session_id = %session_id, error = %e, "memory store failed");
                }
            }
        }

        self.orchestrator.close_session(session_id);
        self.audio.close_session(session_id);
        self.tools.close_session(session_id);
        self.control.close_session(session_id);
        self.router.close_session(session_id);

        ctx.lifecycle().stop().await;

        let _ = self
            .transport
            .send_json(
                session_id,
                protocol::goodbye(session_id, &format!("{:?}", reason)),
            )
            .await;
        self.transport.unregister(session_id).await;

        let removed = self.container.cleanup_session(session_id);
        metrics::gauge!("voice_fleet_sessions").decrement(1.0);
        tracing::debug!(
            session_id = %session_id,
            container_entries = removed,
            "session destroyed"
        );
    }

    /// Background task destroying idle sessions
    ///
    /// Runs every monitor tick; a session idle past the threshold is gone
    /// within one tick. Returns the shutdown switch.
    pub fn start_inactivity_monitor(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let tick = Duration::from_secs(self.settings.monitor_tick_secs);
        let timeout = Duration::from_secs(self.settings.inactivity_timeout_secs);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let idle: Vec<String> = manager
                            .sessions
                            .iter()
                            .filter(|e| e.value().idle_for() >= timeout)
                            .map(|e| e.key().clone())
                            .collect();
                        for session_id in idle {
                            tracing::info!(session_id = %session_id, "inactivity timeout");
                            manager
                                .destroy_session(&session_id, CloseReason::InactivityTimeout)
                                .await;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("inactivity monitor shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Destroy every session (server shutdown)
    pub async fn destroy_all(&self, reason: CloseReason) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for session_id in ids {
            self.destroy_session(&session_id, reason).await;
        }
    }
}
