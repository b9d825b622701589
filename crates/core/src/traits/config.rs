//! Agent configuration port

use async_trait::async_trait;

use crate::agent_config::AgentConfig;
use crate::error::Result;

/// Boundary to the administrative console
///
/// The engine never talks to the console's store directly; it asks this port
/// for the agent bound to a device at session start.
#[async_trait]
pub trait AgentConfigProvider: Send + Sync {
    /// Resolve the agent configuration for a device
    async fn fetch(&self, device_id: &str) -> Result<AgentConfig>;
}
