//! The dialogue turn loop
//!
//! One top-level turn per final recognition: depth 0 opens the utterance
//! bracket, streams the model, dispatches tool calls, recurses while a tool
//! demands another model turn, and closes the bracket exactly once.
//! `client_abort` is observed at every suspension point; an aborted turn
//! returns without closing the bracket (the abort path already sent the
//! synthetic stop).

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;

use voice_fleet_core::{
    Action, AgentConfig, ChatRequest, EventKind, IntentMode, LanguageModel, LlmChunk, Memory,
    MemoryMode, Message, Outbound, SentenceUnit, SessionEvent, ToolCall, Turn, TurnRole,
};
use voice_fleet_pipeline::TtsOrchestrator;
use voice_fleet_runtime::{DiContainer, EventBus, SessionContext, CONTEXT_SERVICE};
use voice_fleet_tools::ToolHandler;

use crate::intent::IntentService;
use crate::sentence::SentenceSplitter;
use crate::DialogueError;

/// Dialogue tuning
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    /// Maximum tool-call recursion depth per user turn
    pub max_tool_depth: u32,
    /// Turns of history handed to the model
    pub history_window: usize,
    /// Spoken when a provider fails mid-turn
    pub apology: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_tool_depth: 5,
            history_window: 20,
            apology: "Sorry, I didn't catch that. Could you say it again?".to_string(),
            max_tokens: 256,
            temperature: 0.7,
        }
    }
}

/// How a (possibly recursive) model turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    Completed,
    Aborted,
}

/// Drives LLM turns and tool dispatch for every session
pub struct DialogueService {
    container: Arc<DiContainer>,
    orchestrator: Arc<TtsOrchestrator>,
    tools: Arc<ToolHandler>,
    intent: IntentService,
    outbound: Arc<dyn Outbound>,
    config: DialogueConfig,
}

impl DialogueService {
    pub fn new(
        container: Arc<DiContainer>,
        orchestrator: Arc<TtsOrchestrator>,
        tools: Arc<ToolHandler>,
        outbound: Arc<dyn Outbound>,
        config: DialogueConfig,
    ) -> Self {
        let intent = IntentService::new(container.clone(), tools.clone());
        Self {
            container,
            orchestrator,
            tools,
            intent,
            outbound,
            config,
        }
    }

    /// Subscribe the turn entry point: final recognitions start a tracked
    /// dialogue task so the audio path is never blocked behind a turn
    pub fn register_handlers(self: &Arc<Self>, bus: &EventBus) {
        let service = self.clone();
        bus.subscribe_async(EventKind::TextRecognized, move |event| {
            let service = service.clone();
            Box::pin(async move {
                let SessionEvent::TextRecognized {
                    session_id,
                    text,
                    is_final: true,
                } = event
                else {
                    return Ok(());
                };
                let ctx = service.context(&session_id)?;
                let task_service = service.clone();
                let task_text = text.clone();
                ctx.lifecycle()
                    .spawn("dialogue-turn", async move {
                        if let Err(e) = task_service
                            .process_user_input(&session_id, &task_text)
                            .await
                        {
                            tracing::error!(session_id = %session_id, error = %e,
                                "dialogue turn failed");
                        }
                    })
                    .map_err(|e| voice_fleet_core::Error::Configuration(e.to_string()))?;
                Ok(())
            })
        });
    }

    fn context(&self, session_id: &str) -> voice_fleet_core::Result<Arc<SessionContext>> {
        self.container
            .resolve_session::<Arc<SessionContext>>(session_id, CONTEXT_SERVICE)
            .map_err(|e| voice_fleet_core::Error::Configuration(e.to_string()))
    }

    /// One top-level user turn
    pub async fn process_user_input(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<(), DialogueError> {
        let ctx = self.context(session_id)?;
        let agent = ctx.agent();
        let turn_started = std::time::Instant::now();

        // A new user turn supersedes any pending abort.
        ctx.set_client_abort(false);
        ctx.set_llm_finish_task(false);
        let sentence_id = ctx.next_sentence_id();
        ctx.history.push(Turn::user(text));

        let _ = self
            .outbound
            .send_json(
                session_id,
                serde_json::json!({"type": "stt", "text": text, "session_id": session_id}),
            )
            .await;
        let _ = self
            .outbound
            .send_json(
                session_id,
                serde_json::json!({"type": "llm", "emotion": "thinking", "session_id": session_id}),
            )
            .await;

        self.orchestrator
            .enqueue(session_id, SentenceUnit::first(sentence_id, ""))?;

        // intent_llm mode: a routed tool may answer without the chat model.
        if agent.intent_mode == IntentMode::IntentLlm {
            match self
                .intent
                .classify_and_execute(session_id, &ctx, text)
                .await
            {
                Ok(Some(response)) if response.action != Action::ReqLlm => {
                    self.speak_action(session_id, sentence_id, &ctx, &response)?;
                    self.finish_turn(session_id, sentence_id, &ctx, turn_started)?;
                    return Ok(());
                }
                Ok(Some(response)) => {
                    // ReqLlm: fall through to the chat model with the tool
                    // feedback as extra context.
                    if let Some(feedback) = response.text {
                        ctx.history.push(Turn::system(feedback));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e,
                        "intent recognition failed, continuing as chat");
                }
            }
        }

        let messages = self.build_messages(&ctx, &agent, text).await;
        match self
            .chat_turn(session_id, &ctx, &agent, messages, 0)
            .await
        {
            Ok(TurnOutcome::Completed) => {
                self.finish_turn(session_id, sentence_id, &ctx, turn_started)?;
            }
            Ok(TurnOutcome::Aborted) => {
                tracing::debug!(session_id = %session_id, "turn aborted, bracket left to abort path");
            }
            Err(e) => {
                metrics::counter!("voice_fleet_provider_errors_total", "stage" => "llm")
                    .increment(1);
                tracing::error!(session_id = %session_id, error = %e, "turn failed, apologizing");
                self.orchestrator
                    .enqueue(session_id, SentenceUnit::middle(sentence_id, &self.config.apology))?;
                self.finish_turn(session_id, sentence_id, &ctx, turn_started)?;
            }
        }
        Ok(())
    }

    fn finish_turn(
        &self,
        session_id: &str,
        sentence_id: u64,
        ctx: &SessionContext,
        started: std::time::Instant,
    ) -> Result<(), DialogueError> {
        self.orchestrator
            .enqueue(session_id, SentenceUnit::last(sentence_id))?;
        ctx.set_llm_finish_task(true);
        metrics::histogram!("voice_fleet_turn_seconds").record(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Speak a tool result directly (Response and Error actions)
    fn speak_action(
        &self,
        session_id: &str,
        sentence_id: u64,
        ctx: &SessionContext,
        response: &voice_fleet_core::ActionResponse,
    ) -> Result<(), DialogueError> {
        if let Some(text) = &response.text {
            self.orchestrator
                .enqueue(session_id, SentenceUnit::middle(sentence_id, text))?;
            ctx.history.push(Turn::assistant(text));
        }
        if let Some(file) = response
            .payload
            .as_ref()
            .and_then(|p| p.get("file"))
            .and_then(|f| f.as_str())
        {
            self.orchestrator
                .enqueue(session_id, SentenceUnit::file(sentence_id, file))?;
        }
        Ok(())
    }

    /// System prompt + memory recall + bounded history window
    async fn build_messages(
        &self,
        ctx: &SessionContext,
        agent: &AgentConfig,
        query: &str,
    ) -> Vec<Message> {
        let mut messages = vec![Message::system(&agent.system_prompt)];

        if agent.memory_mode == MemoryMode::Summarize {
            let memory_name = agent
                .providers
                .memory
                .clone()
                .unwrap_or_else(|| "memory.inmemory".to_string());
            if let Ok(memory) = self.container.resolve::<Arc<dyn Memory>>(&memory_name) {
                match memory.recall(&ctx.device_id, query).await {
                    Ok(Some(context)) => {
                        messages.push(Message::system(format!(
                            "Context from earlier conversations: {}",
                            context
                        )));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(device_id = %ctx.device_id, error = %e, "memory recall failed");
                    }
                }
            }
        }

        // Tool turns are threaded within a turn, not replayed across turns;
        // the cross-turn window carries only spoken dialogue.
        messages.extend(
            ctx.history
                .recent(self.config.history_window)
                .iter()
                .filter(|t| t.role != TurnRole::Tool)
                .map(Turn::to_message),
        );
        messages
    }

    /// One model turn at the given recursion depth
    fn chat_turn<'a>(
        &'a self,
        session_id: &'a str,
        ctx: &'a SessionContext,
        agent: &'a AgentConfig,
        messages: Vec<Message>,
        depth: u32,
    ) -> BoxFuture<'a, Result<TurnOutcome, DialogueError>> {
        async move {
            let max_depth = agent.max_tool_depth.unwrap_or(self.config.max_tool_depth);
            // At maximum depth the model gets no tools: it must answer.
            let with_tools = agent.intent_mode == IntentMode::FunctionCall && depth < max_depth;
            let tools = if with_tools {
                self.tools.definitions(session_id)
            } else {
                Vec::new()
            };

            let llm: Arc<dyn LanguageModel> = self
                .container
                .resolve_session(session_id, &agent.providers.llm)?;
            let request = ChatRequest {
                messages: messages.clone(),
                tools,
                max_tokens: Some(self.config.max_tokens),
                temperature: Some(self.config.temperature),
            };

            let sentence_id = ctx.current_sentence_id();
            let mut stream = llm.chat_stream(request).await?;
            let mut splitter = SentenceSplitter::default();
            let mut assistant_text = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();

            while let Some(chunk) = stream.next().await {
                if ctx.client_abort() {
                    tracing::info!(session_id = %session_id, "model stream abandoned after abort");
                    return Ok(TurnOutcome::Aborted);
                }
                match chunk? {
                    LlmChunk::Text(delta) => {
                        assistant_text.push_str(&delta);
                        for sentence in splitter.push(&delta) {
                            self.orchestrator
                                .enqueue(session_id, SentenceUnit::middle(sentence_id, sentence))?;
                        }
                    }
                    LlmChunk::ToolCall(call) => tool_calls.push(call),
                    LlmChunk::Done(_) => break,
                }
            }
            if let Some(rest) = splitter.flush() {
                self.orchestrator
                    .enqueue(session_id, SentenceUnit::middle(sentence_id, rest))?;
            }
            if !assistant_text.trim().is_empty() {
                ctx.history.push(Turn::assistant(assistant_text.trim()));
            }

            if tool_calls.is_empty() {
                return Ok(TurnOutcome::Completed);
            }

            let mut next_messages = messages;
            next_messages.push(Message::assistant_tool_calls(tool_calls.clone()));

            // Tool calls of one turn run concurrently.
            let results = futures::future::join_all(
                tool_calls.iter().map(|call| self.tools.execute(session_id, call)),
            )
            .await;

            let mut need_llm = false;
            for (call, response) in tool_calls.iter().zip(results) {
                let feedback = response
                    .text
                    .clone()
                    .unwrap_or_else(|| "ok".to_string());
                match response.action {
                    Action::Response | Action::Error => {
                        self.speak_action(session_id, sentence_id, ctx, &response)?;
                    }
                    Action::ReqLlm => need_llm = true,
                    Action::None => {}
                }
                ctx.history.push(Turn::tool(feedback.clone(), call.id.clone()));
                next_messages.push(Message::tool(feedback, call.id.clone()));
            }

            if ctx.client_abort() {
                return Ok(TurnOutcome::Aborted);
            }
            if need_llm && depth < max_depth {
                return self
                    .chat_turn(session_id, ctx, agent, next_messages, depth + 1)
                    .await;
            }
            Ok(TurnOutcome::Completed)
        }
        .boxed()
    }
}
