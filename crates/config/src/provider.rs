//! Agent configuration port implementations

use async_trait::async_trait;
use std::time::Duration;

use voice_fleet_core::{AgentConfig, AgentConfigProvider, Error, Result};

/// Serves the same agent to every device
///
/// Used when no console is deployed, and throughout the test suites.
pub struct StaticAgentConfigProvider {
    config: AgentConfig,
}

impl StaticAgentConfigProvider {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

impl Default for StaticAgentConfigProvider {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

#[async_trait]
impl AgentConfigProvider for StaticAgentConfigProvider {
    async fn fetch(&self, _device_id: &str) -> Result<AgentConfig> {
        Ok(self.config.clone())
    }
}

/// Fetches the agent bound to a device from the console API
pub struct HttpAgentConfigProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentConfigProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("agent api client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AgentConfigProvider for HttpAgentConfigProvider {
    async fn fetch(&self, device_id: &str) -> Result<AgentConfig> {
        let url = format!("{}/agents/by-device/{}", self.base_url, device_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Configuration(format!("agent config fetch: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Configuration(format!(
                "agent config fetch for device {} returned {}",
                device_id,
                response.status()
            )));
        }

        let config: AgentConfig = response
            .json()
            .await
            .map_err(|e| Error::Configuration(format!("agent config decode: {}", e)))?;

        tracing::debug!(device_id = %device_id, agent_id = %config.agent_id, "agent config loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_serves_configured_agent() {
        let mut config = AgentConfig::default();
        config.agent_id = "agent-7".to_string();
        let provider = StaticAgentConfigProvider::new(config);

        let fetched = provider.fetch("any-device").await.unwrap();
        assert_eq!(fetched.agent_id, "agent-7");
    }
}
