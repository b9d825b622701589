//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::DEFAULT_WS_PATH;
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub vad: VadSettings,

    #[serde(default)]
    pub dialogue: DialogueSettings,

    #[serde(default)]
    pub audio: AudioSettings,

    #[serde(default)]
    pub providers: ProviderSettings,

    #[serde(default)]
    pub observability: ObservabilitySettings,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket path devices connect to
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Interval between server pings on an idle connection
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_ws_path() -> String {
    DEFAULT_WS_PATH.to_string()
}
fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Destroy a session after this long without inbound frames
    #[serde(default = "default_inactivity_secs")]
    pub inactivity_timeout_secs: u64,
    /// How often the inactivity monitor runs
    #[serde(default = "default_monitor_tick_secs")]
    pub monitor_tick_secs: u64,
    /// VAD suppression window after a wake word
    #[serde(default = "default_wake_cooldown_ms")]
    pub wake_cooldown_ms: u64,
    /// Turns of history handed to the model per request
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Hard cap on concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_inactivity_secs() -> u64 {
    120
}
fn default_monitor_tick_secs() -> u64 {
    10
}
fn default_wake_cooldown_ms() -> u64 {
    2000
}
fn default_history_window() -> usize {
    20
}
fn default_max_sessions() -> usize {
    1000
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity_secs(),
            monitor_tick_secs: default_monitor_tick_secs(),
            wake_cooldown_ms: default_wake_cooldown_ms(),
            history_window: default_history_window(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Speech segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Trailing silence that closes a speech segment
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    /// Hard cap on segment duration
    #[serde(default = "default_max_segment_ms")]
    pub max_segment_ms: u64,
    /// Energy floor for the baseline detector (dBFS)
    #[serde(default = "default_energy_threshold_db")]
    pub energy_threshold_db: f32,
    /// Frames of pre-roll replayed into ASR at speech start
    #[serde(default = "default_pre_roll_frames")]
    pub pre_roll_frames: usize,
}

fn default_silence_ms() -> u64 {
    700
}
fn default_max_segment_ms() -> u64 {
    15_000
}
fn default_energy_threshold_db() -> f32 {
    -45.0
}
fn default_pre_roll_frames() -> usize {
    5
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            silence_ms: default_silence_ms(),
            max_segment_ms: default_max_segment_ms(),
            energy_threshold_db: default_energy_threshold_db(),
            pre_roll_frames: default_pre_roll_frames(),
        }
    }
}

/// Dialogue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueSettings {
    /// Maximum tool-call recursion depth per user turn
    #[serde(default = "default_max_tool_depth")]
    pub max_tool_depth: u32,
    /// Spoken when a provider fails mid-turn
    #[serde(default = "default_apology")]
    pub apology: String,
    /// Forward non-final ASR text to the client as `stt` frames
    #[serde(default)]
    pub surface_partials: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tool_depth() -> u32 {
    5
}
fn default_apology() -> String {
    "Sorry, I didn't catch that. Could you say it again?".to_string()
}
fn default_max_tokens() -> u32 {
    256
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            max_tool_depth: default_max_tool_depth(),
            apology: default_apology(),
            surface_partials: false,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Audio parameters offered back to the device in the `hello` reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
    #[serde(default = "default_frame_duration_ms")]
    pub frame_duration_ms: u32,
}

fn default_format() -> String {
    "opus".to_string()
}
fn default_sample_rate() -> u32 {
    24_000
}
fn default_channels() -> u8 {
    1
}
fn default_frame_duration_ms() -> u32 {
    60
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            format: default_format(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            frame_duration_ms: default_frame_duration_ms(),
        }
    }
}

/// Provider endpoints and timeouts
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderSettings {
    #[serde(default)]
    pub llm: LlmProviderSettings,
    /// Base URL of the console's agent-configuration API; unset means the
    /// built-in default agent is used for every device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_api_url: Option<String>,
}

/// OpenAI-compatible chat endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderSettings {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the API key, if the endpoint needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_llm_model() -> String {
    "qwen3:4b-instruct".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for LlmProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Logging and metrics switches
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilitySettings {
    /// Emit JSON log lines instead of the human format
    #[serde(default)]
    pub log_json: bool,
    /// Serve Prometheus metrics at /metrics
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

/// Load settings from files and environment
///
/// Priority: env vars > `config/{env}.yaml` > `config/default.yaml` >
/// built-in defaults. Missing files are fine.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    let default_path = Path::new("config/default.yaml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }
    if let Some(env_name) = env {
        let env_path = format!("config/{}.yaml", env_name);
        if Path::new(&env_path).exists() {
            builder = builder.add_source(File::with_name(&env_path));
        }
    }
    builder = builder.add_source(
        Environment::with_prefix("VOICE_FLEET")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.session.monitor_tick_secs == 0 {
        return Err(ConfigError::Invalid {
            key: "session.monitor_tick_secs",
            message: "must be at least 1".to_string(),
        });
    }
    if settings.vad.silence_ms >= settings.vad.max_segment_ms {
        return Err(ConfigError::Invalid {
            key: "vad.silence_ms",
            message: "must be below vad.max_segment_ms".to_string(),
        });
    }
    Ok(())
}
