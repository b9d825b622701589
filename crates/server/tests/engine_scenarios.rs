//! End-to-end engine scenarios, driven through the router as frames
//!
//! Covers: the happy voice turn, malformed JSON resilience, inactivity
//! teardown with container purge, capacity limits, and fatal configuration
//! failures at session creation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use voice_fleet_config::Settings;
use voice_fleet_core::{
    AgentConfig, AgentConfigProvider, Error, LanguageModel, Outbound, Result, SpeechRecognizer,
};
use voice_fleet_config::StaticAgentConfigProvider;
use voice_fleet_providers::{ScriptedAsr, ScriptedLlm, ScriptedTurn};
use voice_fleet_server::{AppState, FrameSink, ServerError};

/// Records everything the "device" received
#[derive(Default)]
struct RecordingSinkState {
    texts: Mutex<Vec<serde_json::Value>>,
    binaries: Mutex<Vec<Vec<u8>>>,
    closed: Mutex<bool>,
}

struct RecordingSink {
    state: Arc<RecordingSinkState>,
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        self.state.texts.lock().push(value);
        Ok(())
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        self.state.binaries.lock().push(data);
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        *self.state.closed.lock() = true;
        Ok(())
    }
}

struct FailingAgentProvider;

#[async_trait]
impl AgentConfigProvider for FailingAgentProvider {
    async fn fetch(&self, _device_id: &str) -> Result<AgentConfig> {
        Err(Error::Configuration("console unreachable".into()))
    }
}

fn test_agent() -> AgentConfig {
    let mut agent = AgentConfig::default();
    agent.providers.llm = "llm.scripted".to_string();
    agent
}

fn app_state() -> AppState {
    AppState::new(
        Settings::default(),
        Arc::new(StaticAgentConfigProvider::new(test_agent())),
    )
}

struct Session {
    state: AppState,
    sink: Arc<RecordingSinkState>,
    session_id: String,
    asr: Arc<ScriptedAsr>,
    llm: Arc<ScriptedLlm>,
}

async fn open_session(state: AppState) -> Session {
    let ctx = state
        .sessions
        .create_session("dev-1", "cli-1", "127.0.0.1", false)
        .await
        .unwrap();
    let session_id = ctx.session_id.clone();

    let sink = Arc::new(RecordingSinkState::default());
    state
        .transport
        .register(&session_id, Box::new(RecordingSink { state: sink.clone() }), false);

    // Swap in test handles so the scripts can be driven from here.
    let asr = Arc::new(ScriptedAsr::new());
    state.container.update_session_service(
        &session_id,
        "asr.scripted",
        asr.clone() as Arc<dyn SpeechRecognizer>,
    );
    let llm = Arc::new(ScriptedLlm::new());
    state.container.update_session_service(
        &session_id,
        "llm.scripted",
        llm.clone() as Arc<dyn LanguageModel>,
    );

    Session {
        state,
        sink,
        session_id,
        asr,
        llm,
    }
}

async fn settle() {
    for _ in 0..80 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

impl Session {
    async fn voice_frame(&self) {
        // Opus voice packets are "large" under the payload-size heuristic.
        self.state
            .router
            .route_binary(&self.session_id, vec![1u8; 120])
            .await;
    }

    async fn silence_frame(&self) {
        self.state
            .router
            .route_binary(&self.session_id, vec![0u8; 3])
            .await;
    }

    fn texts(&self) -> Vec<serde_json::Value> {
        self.sink.texts.lock().clone()
    }
}

#[tokio::test(start_paused = true)]
async fn test_happy_voice_turn() {
    let session = open_session(app_state()).await;
    session.asr.push_transcript("what time is it");
    session
        .llm
        .push_turn(ScriptedTurn::text(&["It is twelve o'clock sharp."]));

    // Speak, then fall silent past the segmentation threshold.
    for _ in 0..3 {
        session.voice_frame().await;
    }
    tokio::time::advance(Duration::from_millis(750)).await;
    session.silence_frame().await;
    settle().await;

    let texts = session.texts();
    let stt = texts.iter().position(|t| t["type"] == "stt").expect("stt frame");
    assert_eq!(texts[stt]["text"], "what time is it");
    let thinking = texts
        .iter()
        .position(|t| t["type"] == "llm")
        .expect("llm state frame");
    let tts_start = texts
        .iter()
        .position(|t| t["type"] == "tts" && t["state"] == "start")
        .expect("tts start");
    let tts_stop = texts
        .iter()
        .rposition(|t| t["type"] == "tts" && t["state"] == "stop")
        .expect("tts stop");
    assert!(stt < tts_start && thinking < tts_start && tts_start < tts_stop);

    assert!(
        !session.sink.binaries.lock().is_empty(),
        "synthesized audio must reach the transport"
    );

    // One user and one assistant entry.
    let ctx = session.state.sessions.get(&session.session_id).unwrap();
    let turns = ctx.history.snapshot();
    assert_eq!(turns.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_json_is_dropped_session_survives() {
    let session = open_session(app_state()).await;

    session
        .state
        .router
        .route_text(&session.session_id, "{not json".to_string())
        .await;
    settle().await;

    assert_eq!(session.state.sessions.count(), 1);
    assert!(session.state.transport.is_connected(&session.session_id));

    // The next well-formed frame is processed normally.
    session
        .state
        .router
        .route_text(&session.session_id, r#"{"type":"abort"}"#.to_string())
        .await;
    settle().await;
    assert_eq!(session.state.sessions.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_timeout_destroys_session() {
    let session = open_session(app_state()).await;
    let monitor = session.state.sessions.start_inactivity_monitor();

    // Default threshold 120 s, tick 10 s: well past both.
    tokio::time::advance(Duration::from_secs(131)).await;
    settle().await;

    assert_eq!(session.state.sessions.count(), 0, "session must be gone");
    assert_eq!(
        session
            .state
            .container
            .session_entry_count(&session.session_id),
        0,
        "container must hold nothing for the destroyed session"
    );
    assert!(!session.state.transport.is_connected(&session.session_id));
    assert!(*session.sink.closed.lock(), "connection must be closed");

    let texts = session.texts();
    assert!(
        texts.iter().any(|t| t["type"] == "goodbye"),
        "close notice expected, got {:?}",
        texts
    );

    let _ = monitor.send(true);
}

#[tokio::test(start_paused = true)]
async fn test_activity_resets_inactivity_clock() {
    let session = open_session(app_state()).await;
    let monitor = session.state.sessions.start_inactivity_monitor();

    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(60)).await;
        session.silence_frame().await; // any inbound frame counts
    }
    settle().await;

    assert_eq!(session.state.sessions.count(), 1, "active session must survive");
    let _ = monitor.send(true);
}

#[tokio::test]
async fn test_capacity_limit() {
    let mut settings = Settings::default();
    settings.session.max_sessions = 1;
    let state = AppState::new(
        settings,
        Arc::new(StaticAgentConfigProvider::new(test_agent())),
    );

    state
        .sessions
        .create_session("dev-1", "cli-1", "127.0.0.1", false)
        .await
        .unwrap();
    let second = state
        .sessions
        .create_session("dev-2", "cli-2", "127.0.0.1", false)
        .await;
    assert!(matches!(second, Err(ServerError::Capacity(1))));
}

#[tokio::test]
async fn test_failed_config_fetch_is_fatal_for_session() {
    let state = AppState::new(Settings::default(), Arc::new(FailingAgentProvider));
    let result = state
        .sessions
        .create_session("dev-1", "cli-1", "127.0.0.1", false)
        .await;
    assert!(matches!(result, Err(ServerError::Configuration(_))));
    assert_eq!(state.sessions.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_abort_frame_stops_playback() {
    let session = open_session(app_state()).await;
    session.asr.push_transcript("tell me everything");
    // Long scripted answer: many sentences queue up.
    session.llm.push_turn(ScriptedTurn::text(&[
        "Chapter one begins here. ",
        "Chapter two follows on. ",
        "Chapter three concludes it. ",
    ]));

    for _ in 0..3 {
        session.voice_frame().await;
    }
    tokio::time::advance(Duration::from_millis(750)).await;
    session.silence_frame().await;
    settle().await;

    // Client aborts mid-response.
    session
        .state
        .router
        .route_text(&session.session_id, r#"{"type":"abort","reason":"wake_word"}"#.to_string())
        .await;
    settle().await;

    let frames_after_abort = session.sink.binaries.lock().len();
    settle().await;
    assert_eq!(
        session.sink.binaries.lock().len(),
        frames_after_abort,
        "no audio may trickle out after the abort settled"
    );

    let ctx = session.state.sessions.get(&session.session_id).unwrap();
    assert!(ctx.client_abort());

    // tts stop reached the device at least once (turn end or synthetic).
    let texts = session.texts();
    assert!(texts
        .iter()
        .any(|t| t["type"] == "tts" && t["state"] == "stop"));
}
