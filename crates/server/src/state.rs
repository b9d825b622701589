//! Application state and wiring
//!
//! The composition root: builds the container, registers the provider
//! catalogue, constructs every service, and subscribes them on the bus.
//! Provider factories hold a weak container handle; the container must not
//! own itself through its own factories.

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;

use voice_fleet_config::Settings;
use voice_fleet_core::{
    AgentConfigProvider, Error, IntentRecognizer, LanguageModel, Memory, SpeechRecognizer,
    SpeechSynthesizer, VoiceActivityDetector,
};
use voice_fleet_dialogue::{DialogueConfig, DialogueService};
use voice_fleet_pipeline::{AudioProcessingService, AudioServiceConfig, TtsOrchestrator};
use voice_fleet_providers::{
    EnergyVad, EnergyVadConfig, InMemoryMemory, LlmIntentRecognizer, OpenAiChatLlm,
    OpenAiLlmConfig, ScriptedAsr, ScriptedLlm, ScriptedTts,
};
use voice_fleet_runtime::{DiContainer, EventBus, SessionContext, CONTEXT_SERVICE};
use voice_fleet_tools::ToolHandler;

use crate::control::ControlService;
use crate::router::MessageRouter;
use crate::session::SessionManager;
use crate::transport::Transport;

/// Shared state behind every handler
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RwLock<Settings>>,
    pub container: Arc<DiContainer>,
    pub bus: Arc<EventBus>,
    pub transport: Arc<Transport>,
    pub router: Arc<MessageRouter>,
    pub audio: Arc<AudioProcessingService>,
    pub orchestrator: Arc<TtsOrchestrator>,
    pub dialogue: Arc<DialogueService>,
    pub tools: Arc<ToolHandler>,
    pub control: Arc<ControlService>,
    pub sessions: Arc<SessionManager>,
    pub metrics_handle: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    /// Wire the whole engine
    pub fn new(settings: Settings, agent_provider: Arc<dyn AgentConfigProvider>) -> Self {
        let container = Arc::new(DiContainer::new());
        let bus = Arc::new(EventBus::new());
        let transport = Arc::new(Transport::new());

        register_provider_catalogue(&container, &settings);

        let orchestrator = Arc::new(TtsOrchestrator::new(
            container.clone(),
            bus.clone(),
            transport.clone(),
        ));
        let audio = Arc::new(
            AudioProcessingService::new(
                container.clone(),
                bus.clone(),
                AudioServiceConfig {
                    silence: Duration::from_millis(settings.vad.silence_ms),
                    max_segment: Duration::from_millis(settings.vad.max_segment_ms),
                    pre_roll_frames: settings.vad.pre_roll_frames,
                    wake_cooldown: Duration::from_millis(settings.session.wake_cooldown_ms),
                    surface_partials: settings.dialogue.surface_partials,
                    apology: settings.dialogue.apology.clone(),
                },
            )
            .with_orchestrator(orchestrator.clone()),
        );
        let tools = Arc::new(ToolHandler::new(
            container.clone(),
            bus.clone(),
            transport.clone(),
        ));
        let dialogue = Arc::new(DialogueService::new(
            container.clone(),
            orchestrator.clone(),
            tools.clone(),
            transport.clone(),
            DialogueConfig {
                max_tool_depth: settings.dialogue.max_tool_depth,
                history_window: settings.session.history_window,
                apology: settings.dialogue.apology.clone(),
                max_tokens: settings.dialogue.max_tokens,
                temperature: settings.dialogue.temperature,
            },
        ));
        let router = Arc::new(MessageRouter::new(bus.clone(), container.clone()));
        let control = Arc::new(ControlService::new(
            container.clone(),
            bus.clone(),
            audio.clone(),
            orchestrator.clone(),
            tools.clone(),
            transport.clone(),
            agent_provider.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            container.clone(),
            bus.clone(),
            transport.clone(),
            router.clone(),
            audio.clone(),
            orchestrator.clone(),
            tools.clone(),
            control.clone(),
            agent_provider,
            settings.session.clone(),
        ));

        audio.register_handlers(&bus);
        orchestrator.register_handlers(&bus);
        dialogue.register_handlers(&bus);
        control.register_handlers(&bus);
        sessions.register_handlers(&bus);

        Self {
            settings: Arc::new(RwLock::new(settings)),
            container,
            bus,
            transport,
            router,
            audio,
            orchestrator,
            dialogue,
            tools,
            control,
            sessions,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics_handle = handle.map(Arc::new);
        self
    }
}

/// Register every provider the engine can bind an agent to
///
/// Agent configurations select providers by these names. Session scope
/// gives each session its own detector and recognizer state; the chat
/// model and memory are shared singletons.
fn register_provider_catalogue(container: &Arc<DiContainer>, settings: &Settings) {
    let weak: Weak<DiContainer> = Arc::downgrade(container);
    let vad_threshold = settings.vad.energy_threshold_db;
    let llm_settings = settings.providers.llm.clone();

    container.register_session("vad.energy", move |_session_id: &str| {
        Ok(Arc::new(EnergyVad::new(EnergyVadConfig {
            threshold_db: vad_threshold,
            ..EnergyVadConfig::default()
        })) as Arc<dyn VoiceActivityDetector>)
    });

    container.register_session("asr.scripted", |_session_id: &str| {
        Ok(Arc::new(ScriptedAsr::new()) as Arc<dyn SpeechRecognizer>)
    });

    container.register_session("tts.scripted", |_session_id: &str| {
        Ok(Arc::new(ScriptedTts::default()) as Arc<dyn SpeechSynthesizer>)
    });

    container.register_singleton("llm.openai", move || {
        let api_key = llm_settings
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok());
        Ok(Arc::new(OpenAiChatLlm::new(OpenAiLlmConfig {
            base_url: llm_settings.base_url.clone(),
            model: llm_settings.model.clone(),
            api_key,
            connect_timeout: Duration::from_secs(llm_settings.connect_timeout_secs),
            request_timeout: Duration::from_secs(llm_settings.request_timeout_secs),
        })?) as Arc<dyn LanguageModel>)
    });

    let weak_for_llm = weak.clone();
    container.register_session("llm.openai", move |_session_id: &str| {
        let container = weak_for_llm
            .upgrade()
            .ok_or_else(|| Error::Configuration("container gone".into()))?;
        container
            .resolve::<Arc<dyn LanguageModel>>("llm.openai")
            .map_err(|e| Error::Configuration(e.to_string()))
    });

    container.register_session("llm.scripted", |_session_id: &str| {
        Ok(Arc::new(ScriptedLlm::new()) as Arc<dyn LanguageModel>)
    });

    let weak_for_intent = weak.clone();
    container.register_session("intent.llm", move |session_id: &str| {
        let container = weak_for_intent
            .upgrade()
            .ok_or_else(|| Error::Configuration("container gone".into()))?;
        let ctx = container
            .resolve_session::<Arc<SessionContext>>(session_id, CONTEXT_SERVICE)
            .map_err(|e| Error::Configuration(e.to_string()))?;
        let llm = container
            .resolve_session::<Arc<dyn LanguageModel>>(session_id, &ctx.agent().providers.llm)
            .map_err(|e| Error::Configuration(e.to_string()))?;
        Ok(Arc::new(LlmIntentRecognizer::new(llm)) as Arc<dyn IntentRecognizer>)
    });

    let weak_for_memory = weak;
    container.register_singleton("memory.inmemory", move || {
        let llm = weak_for_memory
            .upgrade()
            .and_then(|c| c.resolve::<Arc<dyn LanguageModel>>("llm.openai").ok());
        Ok(Arc::new(InMemoryMemory::new(llm)) as Arc<dyn Memory>)
    });
}
