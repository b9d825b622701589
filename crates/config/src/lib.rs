//! Configuration for the voice fleet engine
//!
//! Settings are layered: built-in defaults, then `config/default.yaml`,
//! then `config/{env}.yaml`, then `VOICE_FLEET__*` environment variables.

pub mod constants;
pub mod provider;
pub mod settings;

pub use provider::{HttpAgentConfigProvider, StaticAgentConfigProvider};
pub use settings::{
    load_settings, AudioSettings, DialogueSettings, LlmProviderSettings, ProviderSettings,
    RuntimeEnvironment, ServerSettings, SessionSettings, Settings, VadSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl From<ConfigError> for voice_fleet_core::Error {
    fn from(err: ConfigError) -> Self {
        voice_fleet_core::Error::Configuration(err.to_string())
    }
}
