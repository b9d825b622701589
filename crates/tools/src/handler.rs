//! Tool dispatch
//!
//! Looks the function up in the session registry, classifies it, executes
//! it with a timeout, and always comes back with an ActionResponse: tool
//! failures become `Error` actions, never panics or raised errors.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use voice_fleet_core::{ActionResponse, Outbound, ToolCall, ToolDefinition};
use voice_fleet_runtime::{DiContainer, EventBus};

use crate::registry::{ToolKind, ToolRegistry};

/// Context handed to system-control tools
#[derive(Clone)]
pub struct SystemContext {
    pub session_id: String,
    pub container: Arc<DiContainer>,
    pub bus: Arc<EventBus>,
    pub outbound: Arc<dyn Outbound>,
}

/// Per-session tool dispatch
pub struct ToolHandler {
    container: Arc<DiContainer>,
    bus: Arc<EventBus>,
    outbound: Arc<dyn Outbound>,
    registries: DashMap<String, Arc<RwLock<ToolRegistry>>>,
}

impl ToolHandler {
    pub fn new(
        container: Arc<DiContainer>,
        bus: Arc<EventBus>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            container,
            bus,
            outbound,
            registries: DashMap::new(),
        }
    }

    /// Install the session registry, seeded with the built-in system tools
    pub fn open_session(&self, session_id: &str) {
        let mut registry = ToolRegistry::new();
        crate::builtin::install(&mut registry);
        self.registries
            .insert(session_id.to_string(), Arc::new(RwLock::new(registry)));
    }

    pub fn close_session(&self, session_id: &str) {
        self.registries.remove(session_id);
    }

    /// Register an additional tool for one session (device tools, plugins)
    pub fn register_tool(&self, session_id: &str, tool: Arc<dyn crate::Tool>) {
        if let Some(registry) = self.registries.get(session_id) {
            registry.write().register_arc(tool);
        }
    }

    /// Schemas of the session's active tools
    pub fn definitions(&self, session_id: &str) -> Vec<ToolDefinition> {
        self.registries
            .get(session_id)
            .map(|r| r.read().definitions())
            .unwrap_or_default()
    }

    /// Execute one tool call
    ///
    /// Unknown tools and failures come back as `Error` actions; the caller
    /// speaks the message and does not re-invoke the model.
    pub async fn execute(&self, session_id: &str, call: &ToolCall) -> ActionResponse {
        let tool = self
            .registries
            .get(session_id)
            .and_then(|r| r.read().get(&call.name).cloned());

        let Some(tool) = tool else {
            tracing::warn!(session_id = %session_id, tool = %call.name, "unknown tool");
            return ActionResponse::error(format!("I don't have a function called {}.", call.name));
        };

        let system = match tool.kind() {
            ToolKind::SystemCtl => Some(SystemContext {
                session_id: session_id.to_string(),
                container: self.container.clone(),
                bus: self.bus.clone(),
                outbound: self.outbound.clone(),
            }),
            ToolKind::UserFunction => None,
        };

        let timeout = Duration::from_secs(tool.timeout_secs());
        let started = std::time::Instant::now();
        let result =
            tokio::time::timeout(timeout, tool.execute(system.as_ref(), call.arguments.clone()))
                .await;

        metrics::counter!("voice_fleet_tool_calls_total", "tool" => call.name.clone())
            .increment(1);

        match result {
            Ok(Ok(response)) => {
                tracing::debug!(
                    session_id = %session_id,
                    tool = %call.name,
                    action = ?response.action,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool executed"
                );
                response
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session_id, tool = %call.name, error = %e,
                    "tool failed");
                ActionResponse::error(format!("The {} function failed.", call.name))
            }
            Err(_) => {
                tracing::warn!(session_id = %session_id, tool = %call.name,
                    timeout_secs = timeout.as_secs(), "tool timed out");
                ActionResponse::error(format!("The {} function took too long.", call.name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Tool;
    use crate::ToolError;
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("slow", "sleeps forever", serde_json::json!({"type": "object"}))
        }

        fn timeout_secs(&self) -> u64 {
            1
        }

        async fn execute(
            &self,
            _system: Option<&SystemContext>,
            _arguments: serde_json::Value,
        ) -> Result<ActionResponse, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ActionResponse::none())
        }
    }

    struct NoopOutbound;

    #[async_trait]
    impl Outbound for NoopOutbound {
        async fn send_json(
            &self,
            _session_id: &str,
            _payload: serde_json::Value,
        ) -> voice_fleet_core::Result<()> {
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

    fn handler() -> ToolHandler {
        ToolHandler::new(
            Arc::new(DiContainer::new()),
            Arc::new(EventBus::new()),
            Arc::new(NoopOutbound),
        )
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_action() {
        let handler = handler();
        handler.open_session("s1");
        let call = ToolCall::new("call_1", "no_such_tool", serde_json::json!({}));
        let response = handler.execute("s1", &call).await;
        assert_eq!(response.action, voice_fleet_core::Action::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout_is_error_action() {
        let handler = handler();
        handler.open_session("s1");
        handler.register_tool("s1", Arc::new(SlowTool));
        let call = ToolCall::new("call_1", "slow", serde_json::json!({}));
        let response = handler.execute("s1", &call).await;
        assert_eq!(response.action, voice_fleet_core::Action::Error);
    }

    #[tokio::test]
    async fn test_builtin_tools_installed_on_open() {
        let handler = handler();
        handler.open_session("s1");
        let names: Vec<String> = handler
            .definitions("s1")
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(names.contains(&"get_time".to_string()));
        assert!(names.contains(&"exit_session".to_string()));
    }
}
