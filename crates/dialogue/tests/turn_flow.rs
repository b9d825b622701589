//! Dialogue turn properties
//!
//! Covers: exactly one TtsStart/TtsEnd pair per user turn, bounded tool
//! recursion with schemas omitted at maximum depth, abort semantics during
//! streaming, tool results played as text + file, and the apology path
//! when the model fails.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use voice_fleet_core::{
    AbortReason, ActionResponse, AudioFrame, ChatRequest, ChunkStream, Error, EventKind,
    IntentMode, LanguageModel, LlmChunk, Outbound, Result, SessionEvent, SpeechSynthesizer,
    ToolCall, ToolDefinition,
};
use voice_fleet_dialogue::{DialogueConfig, DialogueService};
use voice_fleet_pipeline::TtsOrchestrator;
use voice_fleet_providers::{ScriptedLlm, ScriptedTts, ScriptedTurn};
use voice_fleet_runtime::{
    DiContainer, EventBus, LifecycleManager, SessionContext, CONTEXT_SERVICE,
};
use voice_fleet_tools::{SystemContext, Tool, ToolHandler};

#[derive(Default)]
struct RecordingOutbound {
    texts: Mutex<Vec<serde_json::Value>>,
    binaries: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send_json(&self, _session_id: &str, payload: serde_json::Value) -> Result<()> {
        self.texts.lock().push(payload);
        Ok(())
    }

    async fn send_audio(&self, _session_id: &str, frame: AudioFrame) -> Result<()> {
        self.binaries.lock().push(frame.payload.to_vec());
        Ok(())
    }

    fn is_connected(&self, _session_id: &str) -> bool {
        true
    }
}

/// Model whose stream the test drives chunk by chunk
struct ChannelLlm {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<LlmChunk>>>>,
}

#[async_trait]
impl LanguageModel for ChannelLlm {
    async fn chat_stream(&self, _request: ChatRequest) -> Result<ChunkStream> {
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| Error::provider("llm", "stream already taken"))?;
        Ok(Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)))
    }

    fn model_name(&self) -> &str {
        "channel-llm"
    }
}

/// Model that fails on contact
struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    async fn chat_stream(&self, _request: ChatRequest) -> Result<ChunkStream> {
        Err(Error::provider("llm", "endpoint unreachable"))
    }

    fn model_name(&self) -> &str {
        "failing-llm"
    }
}

/// Tool whose result demands another model turn
struct LookupTool;

#[async_trait]
impl Tool for LookupTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "lookup",
            "Look something up.",
            serde_json::json!({"type": "object", "properties": {}}),
        )
    }

    async fn execute(
        &self,
        _system: Option<&SystemContext>,
        _arguments: serde_json::Value,
    ) -> std::result::Result<ActionResponse, voice_fleet_tools::ToolError> {
        Ok(ActionResponse::req_llm("lookup result: 42"))
    }
}

struct Rig {
    dialogue: Arc<DialogueService>,
    container: Arc<DiContainer>,
    bus: Arc<EventBus>,
    outbound: Arc<RecordingOutbound>,
    ctx: Arc<SessionContext>,
    tools: Arc<ToolHandler>,
    tts_events: Arc<Mutex<Vec<&'static str>>>,
}

fn rig() -> Rig {
    let container = Arc::new(DiContainer::new());
    let bus = Arc::new(EventBus::new());
    let outbound = Arc::new(RecordingOutbound::default());

    container.register_session("tts.scripted", |_| {
        Ok(Arc::new(ScriptedTts::new(2, 160)) as Arc<dyn SpeechSynthesizer>)
    });

    let lifecycle = Arc::new(LifecycleManager::new("s1"));
    let ctx = Arc::new(SessionContext::new(
        "s1", "dev-1", "cli-1", "127.0.0.1", false, lifecycle,
    ));
    container.update_session_service("s1", CONTEXT_SERVICE, ctx.clone());

    let orchestrator = Arc::new(TtsOrchestrator::new(
        container.clone(),
        bus.clone(),
        outbound.clone(),
    ));
    orchestrator.register_handlers(&bus);
    orchestrator.open_session(ctx.clone()).unwrap();

    let tools = Arc::new(ToolHandler::new(
        container.clone(),
        bus.clone(),
        outbound.clone(),
    ));
    tools.open_session("s1");

    let dialogue = Arc::new(DialogueService::new(
        container.clone(),
        orchestrator,
        tools.clone(),
        outbound.clone(),
        DialogueConfig {
            max_tool_depth: 2,
            ..DialogueConfig::default()
        },
    ));

    let tts_events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let events = tts_events.clone();
    bus.subscribe(EventKind::TtsStart, move |_| {
        events.lock().push("start");
        Ok(())
    });
    let events = tts_events.clone();
    bus.subscribe(EventKind::TtsEnd, move |_| {
        events.lock().push("end");
        Ok(())
    });

    Rig {
        dialogue,
        container,
        bus,
        outbound,
        ctx,
        tools,
        tts_events,
    }
}

impl Rig {
    fn install_llm(&self, llm: Arc<dyn LanguageModel>) {
        self.container.update_session_service("s1", "llm.openai", llm);
    }

    fn set_agent(&self, mutate: impl FnOnce(&mut voice_fleet_core::AgentConfig)) {
        let mut agent = (*self.ctx.agent()).clone();
        mutate(&mut agent);
        self.ctx.set_agent(Arc::new(agent));
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_plain_turn_brackets_once() {
    let rig = rig();
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_turn(ScriptedTurn::text(&["It is ", "twelve o'clock. ", "Anything else?"]));
    rig.install_llm(llm);

    rig.dialogue.process_user_input("s1", "what time is it").await.unwrap();
    settle().await;

    assert_eq!(*rig.tts_events.lock(), vec!["start", "end"]);
    assert!(rig.ctx.llm_finish_task());
    assert!(!rig.outbound.binaries.lock().is_empty());

    // stt echo precedes the tts bracket.
    let texts = rig.outbound.texts.lock();
    let stt_pos = texts.iter().position(|t| t["type"] == "stt").unwrap();
    let tts_pos = texts
        .iter()
        .position(|t| t["type"] == "tts" && t["state"] == "start")
        .unwrap();
    assert!(stt_pos < tts_pos);

    // History gained one user and one assistant turn.
    let turns = rig.ctx.history.snapshot();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "what time is it");
    assert!(turns[1].content.contains("twelve o'clock"));
}

#[tokio::test]
async fn test_recursion_is_bounded_and_tools_omitted_at_max_depth() {
    let rig = rig();
    rig.set_agent(|agent| {
        agent.intent_mode = IntentMode::FunctionCall;
        agent.max_tool_depth = Some(2);
    });
    rig.tools.register_tool("s1", Arc::new(LookupTool));

    let llm = Arc::new(ScriptedLlm::new());
    // Depth 0 and 1 call the tool again; depth 2 must answer.
    llm.push_turn(ScriptedTurn::tool_call(ToolCall::new(
        "c0", "lookup", serde_json::json!({}),
    )));
    llm.push_turn(ScriptedTurn::tool_call(ToolCall::new(
        "c1", "lookup", serde_json::json!({}),
    )));
    llm.push_turn(ScriptedTurn::text(&["The answer is 42."]));
    rig.install_llm(llm.clone());

    rig.dialogue.process_user_input("s1", "look it up").await.unwrap();
    settle().await;

    let requests = llm.seen_requests();
    assert_eq!(requests.len(), 3, "depth bound stops the loop");
    assert!(!requests[0].tools.is_empty());
    assert!(!requests[1].tools.is_empty());
    assert!(
        requests[2].tools.is_empty(),
        "the call at max depth must omit tool schemas"
    );
    assert_eq!(*rig.tts_events.lock(), vec!["start", "end"]);
}

#[tokio::test]
async fn test_abort_mid_stream_leaves_bracket_to_abort_path() {
    let rig = rig();
    let (tx, rx) = mpsc::unbounded_channel();
    rig.install_llm(Arc::new(ChannelLlm {
        rx: Mutex::new(Some(rx)),
    }));

    let dialogue = rig.dialogue.clone();
    let turn = tokio::spawn(async move {
        dialogue.process_user_input("s1", "tell me a story").await
    });

    // First sentence flows out normally.
    tx.send(Ok(LlmChunk::Text("Once upon a time. ".to_string()))).unwrap();
    settle().await;
    let frames_before = rig.outbound.binaries.lock().len();
    assert!(frames_before > 0, "first sentence must have been spoken");

    // Barge-in.
    rig.bus
        .publish(SessionEvent::AbortRequest {
            session_id: "s1".to_string(),
            reason: AbortReason::UserInterrupt,
        })
        .await;

    // The model keeps streaming into the void.
    tx.send(Ok(LlmChunk::Text("There was a dragon. ".to_string()))).unwrap();
    tx.send(Ok(LlmChunk::Text("The end. ".to_string()))).unwrap();
    settle().await;
    drop(tx);

    turn.await.unwrap().unwrap();
    settle().await;

    // No audio after the abort for the cut-off sentence.
    assert_eq!(rig.outbound.binaries.lock().len(), frames_before);
    // One start, one (synthetic) end: the turn itself added nothing.
    assert_eq!(*rig.tts_events.lock(), vec!["start", "end"]);
    assert!(!rig.ctx.llm_finish_task(), "aborted turn never finished");
}

#[tokio::test]
async fn test_tool_response_with_file_plays_text_then_file() {
    let dir = std::env::temp_dir().join(format!("vf-music-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let song = dir.join("Smooth Jazz.opus");
    tokio::fs::write(&song, vec![7u8; 5000]).await.unwrap();

    let rig = rig();
    rig.set_agent(|agent| agent.intent_mode = IntentMode::FunctionCall);
    rig.tools.register_tool(
        "s1",
        Arc::new(voice_fleet_tools::builtin::PlayMusic::new(&dir)),
    );

    let llm = Arc::new(ScriptedLlm::new());
    llm.push_turn(ScriptedTurn::tool_call(ToolCall::new(
        "c0",
        "play_music",
        serde_json::json!({"song_name": "jazz"}),
    )));
    rig.install_llm(llm);

    rig.dialogue.process_user_input("s1", "play some jazz").await.unwrap();
    settle().await;

    // Announcement sentence, then the file bytes, then the close.
    let texts = rig.outbound.texts.lock();
    assert!(texts
        .iter()
        .any(|t| t["state"] == "sentence_start" && t["text"].as_str().unwrap().contains("Playing")));
    drop(texts);

    let binaries = rig.outbound.binaries.lock();
    let file_bytes: usize = binaries
        .iter()
        .filter(|f| f.iter().all(|&b| b == 7))
        .map(|f| f.len())
        .sum();
    assert_eq!(file_bytes, 5000, "whole file must be streamed");
    drop(binaries);

    assert_eq!(*rig.tts_events.lock(), vec!["start", "end"]);
    tokio::fs::remove_dir_all(&dir).await.unwrap();
}

#[tokio::test]
async fn test_provider_failure_speaks_apology_and_closes_bracket() {
    let rig = rig();
    rig.install_llm(Arc::new(FailingLlm));

    rig.dialogue.process_user_input("s1", "hello?").await.unwrap();
    settle().await;

    let texts = rig.outbound.texts.lock();
    assert!(
        texts
            .iter()
            .any(|t| t["state"] == "sentence_start"
                && t["text"].as_str().unwrap().contains("Sorry")),
        "apology must be spoken: {:?}",
        *texts
    );
    drop(texts);
    // The bracket still balances (P1).
    assert_eq!(*rig.tts_events.lock(), vec!["start", "end"]);
    assert!(rig.ctx.llm_finish_task());
}

#[tokio::test]
async fn test_unknown_tool_error_is_spoken_not_reinvoked() {
    let rig = rig();
    rig.set_agent(|agent| agent.intent_mode = IntentMode::FunctionCall);

    let llm = Arc::new(ScriptedLlm::new());
    llm.push_turn(ScriptedTurn::tool_call(ToolCall::new(
        "c0",
        "nonexistent_gadget",
        serde_json::json!({}),
    )));
    rig.install_llm(llm.clone());

    rig.dialogue.process_user_input("s1", "use the gadget").await.unwrap();
    settle().await;

    // Only the initial request went to the model.
    assert_eq!(llm.seen_requests().len(), 1);
    let texts = rig.outbound.texts.lock();
    assert!(texts
        .iter()
        .any(|t| t["state"] == "sentence_start"
            && t["text"].as_str().unwrap().contains("nonexistent_gadget")));
}
