//! Tool port and per-session registry

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use voice_fleet_core::{ActionResponse, ToolDefinition};

use crate::handler::SystemContext;
use crate::ToolError;

/// Default timeout for tool execution
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Privilege level of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Engine-control tool; receives the system context
    SystemCtl,
    /// Plain function; receives only its declared arguments
    UserFunction,
}

/// A callable function exposed to the dialogue
#[async_trait]
pub trait Tool: Send + Sync {
    /// Schema advertised to the model
    fn definition(&self) -> ToolDefinition;

    fn kind(&self) -> ToolKind {
        ToolKind::UserFunction
    }

    fn timeout_secs(&self) -> u64 {
        DEFAULT_TOOL_TIMEOUT_SECS
    }

    /// Execute with JSON arguments
    ///
    /// `system` is populated only for [`ToolKind::SystemCtl`] tools.
    async fn execute(
        &self,
        system: Option<&SystemContext>,
        arguments: serde_json::Value,
    ) -> Result<ActionResponse, ToolError>;
}

/// Per-session name → tool map
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas of every registered tool
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("echo", "repeats its input", serde_json::json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }))
        }

        async fn execute(
            &self,
            _system: Option<&SystemContext>,
            arguments: serde_json::Value,
        ) -> Result<ActionResponse, ToolError> {
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::invalid("echo", "text is required"))?;
            Ok(ActionResponse::response(text))
        }
    }

    #[test]
    fn test_registry_round_trip() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(EchoTool);
        assert!(registry.has("echo"));
        assert_eq!(registry.definitions().len(), 1);
        registry.remove("echo");
        assert!(registry.is_empty());
    }
}
