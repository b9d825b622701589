//! Per-session state
//!
//! SessionContext is plain data plus interior mutability; control flow lives
//! in the services. Flags are atomics because handlers on different tracked
//! tasks read them at suspension points; everything heavier sits behind
//! parking_lot locks.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use voice_fleet_core::{AgentConfig, AudioCodec, ConversationHistory, ListenMode};

use crate::LifecycleManager;

/// Authoritative per-session state
pub struct SessionContext {
    pub session_id: String,
    pub device_id: String,
    pub client_id: String,
    pub client_ip: String,
    /// Session arrived through the MQTT gateway (audio frames are prefixed
    /// with the 16-byte gateway header)
    pub from_gateway: bool,

    audio_format: RwLock<AudioCodec>,
    features: RwLock<serde_json::Map<String, serde_json::Value>>,
    welcome: RwLock<serde_json::Value>,
    agent: RwLock<Arc<AgentConfig>>,
    pub history: ConversationHistory,

    client_abort: AtomicBool,
    client_is_speaking: AtomicBool,
    listen_mode: RwLock<ListenMode>,
    just_woken_up: AtomicBool,
    client_have_voice: AtomicBool,
    client_voice_stop: AtomicBool,
    llm_finish_task: AtomicBool,

    sentence_seq: AtomicU64,
    current_sentence: AtomicU64,
    current_speaker: RwLock<Option<String>>,
    last_activity: RwLock<Instant>,
    iot_descriptors: RwLock<Vec<serde_json::Value>>,

    lifecycle: Arc<LifecycleManager>,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        device_id: impl Into<String>,
        client_id: impl Into<String>,
        client_ip: impl Into<String>,
        from_gateway: bool,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            device_id: device_id.into(),
            client_id: client_id.into(),
            client_ip: client_ip.into(),
            from_gateway,
            audio_format: RwLock::new(AudioCodec::Opus),
            features: RwLock::new(serde_json::Map::new()),
            welcome: RwLock::new(serde_json::Value::Null),
            agent: RwLock::new(Arc::new(AgentConfig::default())),
            history: ConversationHistory::new(),
            client_abort: AtomicBool::new(false),
            client_is_speaking: AtomicBool::new(false),
            listen_mode: RwLock::new(ListenMode::Auto),
            just_woken_up: AtomicBool::new(false),
            client_have_voice: AtomicBool::new(false),
            client_voice_stop: AtomicBool::new(false),
            llm_finish_task: AtomicBool::new(false),
            sentence_seq: AtomicU64::new(0),
            current_sentence: AtomicU64::new(0),
            current_speaker: RwLock::new(None),
            last_activity: RwLock::new(Instant::now()),
            iot_descriptors: RwLock::new(Vec::new()),
            lifecycle,
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    // --- activity ---

    /// Record inbound activity
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    // --- negotiated configuration ---

    pub fn audio_format(&self) -> AudioCodec {
        *self.audio_format.read()
    }

    pub fn set_audio_format(&self, codec: AudioCodec) {
        *self.audio_format.write() = codec;
    }

    pub fn agent(&self) -> Arc<AgentConfig> {
        self.agent.read().clone()
    }

    pub fn set_agent(&self, config: Arc<AgentConfig>) {
        *self.agent.write() = config;
    }

    pub fn features(&self) -> serde_json::Map<String, serde_json::Value> {
        self.features.read().clone()
    }

    pub fn set_features(&self, features: serde_json::Map<String, serde_json::Value>) {
        *self.features.write() = features;
    }

    /// Whether the client declared a capability in its hello
    pub fn has_feature(&self, name: &str) -> bool {
        self.features
            .read()
            .get(name)
            .map(|v| v.as_bool().unwrap_or(true))
            .unwrap_or(false)
    }

    pub fn welcome(&self) -> serde_json::Value {
        self.welcome.read().clone()
    }

    pub fn set_welcome(&self, welcome: serde_json::Value) {
        *self.welcome.write() = welcome;
    }

    // --- live flags ---

    pub fn client_abort(&self) -> bool {
        self.client_abort.load(Ordering::SeqCst)
    }

    pub fn set_client_abort(&self, value: bool) {
        self.client_abort.store(value, Ordering::SeqCst);
    }

    pub fn client_is_speaking(&self) -> bool {
        self.client_is_speaking.load(Ordering::SeqCst)
    }

    pub fn set_client_is_speaking(&self, value: bool) {
        self.client_is_speaking.store(value, Ordering::SeqCst);
    }

    pub fn listen_mode(&self) -> ListenMode {
        *self.listen_mode.read()
    }

    pub fn set_listen_mode(&self, mode: ListenMode) {
        *self.listen_mode.write() = mode;
    }

    pub fn just_woken_up(&self) -> bool {
        self.just_woken_up.load(Ordering::SeqCst)
    }

    pub fn set_just_woken_up(&self, value: bool) {
        self.just_woken_up.store(value, Ordering::SeqCst);
    }

    pub fn client_have_voice(&self) -> bool {
        self.client_have_voice.load(Ordering::SeqCst)
    }

    pub fn set_client_have_voice(&self, value: bool) {
        self.client_have_voice.store(value, Ordering::SeqCst);
    }

    pub fn client_voice_stop(&self) -> bool {
        self.client_voice_stop.load(Ordering::SeqCst)
    }

    pub fn set_client_voice_stop(&self, value: bool) {
        self.client_voice_stop.store(value, Ordering::SeqCst);
    }

    pub fn llm_finish_task(&self) -> bool {
        self.llm_finish_task.load(Ordering::SeqCst)
    }

    pub fn set_llm_finish_task(&self, value: bool) {
        self.llm_finish_task.store(value, Ordering::SeqCst);
    }

    // --- speaker / sentences ---

    pub fn current_speaker(&self) -> Option<String> {
        self.current_speaker.read().clone()
    }

    pub fn set_current_speaker(&self, speaker: Option<String>) {
        *self.current_speaker.write() = speaker;
    }

    /// Mint the sentence id for a new utterance bracket
    pub fn next_sentence_id(&self) -> u64 {
        let id = self.sentence_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.current_sentence.store(id, Ordering::SeqCst);
        id
    }

    pub fn current_sentence_id(&self) -> u64 {
        self.current_sentence.load(Ordering::SeqCst)
    }

    // --- device state ---

    /// Record an `iot` descriptor announced by the device
    pub fn add_iot_descriptor(&self, descriptor: serde_json::Value) {
        self.iot_descriptors.write().push(descriptor);
    }

    pub fn iot_descriptors(&self) -> Vec<serde_json::Value> {
        self.iot_descriptors.read().clone()
    }
}

/// Well-known container name the session context is cached under
pub const CONTEXT_SERVICE: &str = "context";
