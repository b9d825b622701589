//! Ordered speech output
//!
//! One worker task per session drains a FIFO of sentence units, so the
//! transport sees audio frames exactly in enqueue order and units of an
//! earlier utterance are fully flushed before a later one starts. Abort
//! raises a sentence-id barrier: every unit at or below it is discarded,
//! and in-flight synthesis stops at the next frame boundary.

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use voice_fleet_core::{
    AbortReason, EventKind, Outbound, SentenceContent, SentenceType, SentenceUnit, SessionEvent,
    SpeechSynthesizer,
};
use voice_fleet_runtime::{DiContainer, EventBus, SessionContext};

use crate::PipelineError;

/// Bytes of file audio sent per frame when streaming `File` units
const FILE_CHUNK_BYTES: usize = 4096;

/// Output channel state per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputState {
    Idle,
    Speaking,
    Closing,
}

struct SessionEntry {
    ctx: Arc<SessionContext>,
    tx: mpsc::UnboundedSender<SentenceUnit>,
    /// Highest sentence id ever enqueued for this session
    max_enqueued: Arc<AtomicU64>,
    /// Units with sentence_id <= barrier are dead (abort happened)
    barrier: Arc<AtomicU64>,
    state: Arc<Mutex<OutputState>>,
    active_sentence: Arc<AtomicU64>,
}

/// Serializes all speech output for every session
pub struct TtsOrchestrator {
    container: Arc<DiContainer>,
    bus: Arc<EventBus>,
    outbound: Arc<dyn Outbound>,
    sessions: DashMap<String, SessionEntry>,
}

impl TtsOrchestrator {
    pub fn new(
        container: Arc<DiContainer>,
        bus: Arc<EventBus>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            container,
            bus,
            outbound,
            sessions: DashMap::new(),
        }
    }

    /// Subscribe the orchestrator's abort handling on the bus
    pub fn register_handlers(self: &Arc<Self>, bus: &EventBus) {
        let orchestrator = self.clone();
        bus.subscribe_async(EventKind::AbortRequest, move |event| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                if let SessionEvent::AbortRequest { session_id, reason } = event {
                    orchestrator.abort(&session_id, reason).await;
                }
                Ok(())
            })
        });
    }

    /// Start the output worker for a session
    pub fn open_session(&self, ctx: Arc<SessionContext>) -> Result<(), PipelineError> {
        let session_id = ctx.session_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let barrier = Arc::new(AtomicU64::new(0));
        let state = Arc::new(Mutex::new(OutputState::Idle));
        let active_sentence = Arc::new(AtomicU64::new(0));

        let entry = SessionEntry {
            ctx: ctx.clone(),
            tx,
            max_enqueued: Arc::new(AtomicU64::new(0)),
            barrier: barrier.clone(),
            state: state.clone(),
            active_sentence: active_sentence.clone(),
        };

        let worker = Worker {
            ctx: ctx.clone(),
            container: self.container.clone(),
            bus: self.bus.clone(),
            outbound: self.outbound.clone(),
            barrier,
            state,
            active_sentence,
        };
        ctx.lifecycle()
            .spawn("tts-worker", async move { worker.run(rx).await })?;

        self.sessions.insert(session_id, entry);
        Ok(())
    }

    /// Drop the session's queue; the worker ends when the channel closes
    pub fn close_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Queue one unit of speech work
    pub fn enqueue(&self, session_id: &str, unit: SentenceUnit) -> Result<(), PipelineError> {
        let entry = self
            .sessions
            .get(session_id)
            .ok_or_else(|| PipelineError::SessionNotOpen(session_id.to_string()))?;
        entry
            .max_enqueued
            .fetch_max(unit.sentence_id, Ordering::SeqCst);
        entry
            .tx
            .send(unit)
            .map_err(|_| PipelineError::QueueClosed(session_id.to_string()))
    }

    /// Speak a full one-text bracket (wake replies, apologies)
    pub fn say(&self, session_id: &str, text: &str) -> Result<(), PipelineError> {
        let sentence_id = {
            let entry = self
                .sessions
                .get(session_id)
                .ok_or_else(|| PipelineError::SessionNotOpen(session_id.to_string()))?;
            entry.ctx.next_sentence_id()
        };
        self.enqueue(session_id, SentenceUnit::first(sentence_id, ""))?;
        self.enqueue(session_id, SentenceUnit::middle(sentence_id, text))?;
        self.enqueue(session_id, SentenceUnit::last(sentence_id))
    }

    /// Drain pending units, cancel in-flight synthesis, return to IDLE
    ///
    /// Raises the barrier over every sentence id seen so far, so neither
    /// queued units nor stragglers enqueued late for those ids can play.
    /// Emits a synthetic `tts stop` (and the matching `TtsEnd` event) when
    /// the session was speaking, so the client can clean up playback.
    /// Idempotent: repeated aborts find the channel already idle.
    pub async fn abort(&self, session_id: &str, reason: AbortReason) {
        let Some(entry) = self.sessions.get(session_id) else {
            return;
        };
        let bar = entry.max_enqueued.load(Ordering::SeqCst);
        entry.barrier.fetch_max(bar, Ordering::SeqCst);
        entry.ctx.set_client_abort(true);

        let was_speaking = {
            let mut state = entry.state.lock();
            let speaking = *state != OutputState::Idle;
            *state = OutputState::Idle;
            speaking
        };

        metrics::counter!("voice_fleet_aborts_total").increment(1);
        tracing::info!(
            session_id = %session_id,
            reason = ?reason,
            was_speaking = was_speaking,
            "speech output aborted"
        );

        if was_speaking {
            entry.ctx.set_client_is_speaking(false);
            let sentence_id = entry.active_sentence.load(Ordering::SeqCst);
            let ctx = entry.ctx.clone();
            drop(entry);

            let _ = self
                .outbound
                .send_json(
                    session_id,
                    serde_json::json!({
                        "type": "tts",
                        "state": "stop",
                        "session_id": session_id,
                    }),
                )
                .await;
            self.bus
                .publish(SessionEvent::TtsEnd {
                    session_id: ctx.session_id.clone(),
                    sentence_id,
                })
                .await;
        }
    }

    /// Whether the session's output channel is mid-utterance
    pub fn is_speaking(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|e| *e.state.lock() != OutputState::Idle)
            .unwrap_or(false)
    }
}

/// Per-session output worker
struct Worker {
    ctx: Arc<SessionContext>,
    container: Arc<DiContainer>,
    bus: Arc<EventBus>,
    outbound: Arc<dyn Outbound>,
    barrier: Arc<AtomicU64>,
    state: Arc<Mutex<OutputState>>,
    active_sentence: Arc<AtomicU64>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<SentenceUnit>) {
        let session_id = self.ctx.session_id.clone();
        let mut stop = self.ctx.lifecycle().stop_signal();

        loop {
            let unit = tokio::select! {
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                    continue;
                }
                unit = rx.recv() => match unit {
                    Some(unit) => unit,
                    None => break,
                },
            };

            // Units at or below the barrier died with an abort.
            if unit.sentence_id <= self.barrier.load(Ordering::SeqCst) {
                continue;
            }
            self.process(&session_id, unit).await;
        }
        tracing::debug!(session_id = %session_id, "tts worker ended");
    }

    async fn process(&self, session_id: &str, unit: SentenceUnit) {
        metrics::counter!("voice_fleet_tts_units_total").increment(1);

        match unit.sentence_type {
            SentenceType::First => {
                *self.state.lock() = OutputState::Speaking;
                self.active_sentence.store(unit.sentence_id, Ordering::SeqCst);
                self.ctx.set_client_is_speaking(true);
                let _ = self
                    .outbound
                    .send_json(
                        session_id,
                        serde_json::json!({
                            "type": "tts",
                            "state": "start",
                            "session_id": session_id,
                        }),
                    )
                    .await;
                self.bus
                    .publish(SessionEvent::TtsStart {
                        session_id: session_id.to_string(),
                        sentence_id: unit.sentence_id,
                    })
                    .await;
                if let Some(text) = unit.text() {
                    if !text.is_empty() {
                        self.speak_text(session_id, unit.sentence_id, text).await;
                    }
                }
            }
            SentenceType::Middle => match &unit.content {
                SentenceContent::Text(text) if !text.is_empty() => {
                    self.speak_text(session_id, unit.sentence_id, text).await;
                }
                SentenceContent::Text(_) => {}
                SentenceContent::File(path) => {
                    self.stream_file(session_id, unit.sentence_id, path).await;
                }
                SentenceContent::Action(name) => {
                    tracing::debug!(session_id = %session_id, action = %name, "action marker");
                }
            },
            SentenceType::Last => {
                *self.state.lock() = OutputState::Closing;
                let _ = self
                    .outbound
                    .send_json(
                        session_id,
                        serde_json::json!({
                            "type": "tts",
                            "state": "stop",
                            "session_id": session_id,
                        }),
                    )
                    .await;
                self.ctx.set_client_is_speaking(false);
                *self.state.lock() = OutputState::Idle;
                self.bus
                    .publish(SessionEvent::TtsEnd {
                        session_id: session_id.to_string(),
                        sentence_id: unit.sentence_id,
                    })
                    .await;
            }
        }
    }

    fn cancelled(&self, sentence_id: u64) -> bool {
        sentence_id <= self.barrier.load(Ordering::SeqCst)
    }

    async fn speak_text(&self, session_id: &str, sentence_id: u64, text: &str) {
        let agent = self.ctx.agent();
        let synthesizer: Arc<dyn SpeechSynthesizer> = match self
            .container
            .resolve_session(session_id, &agent.providers.tts)
        {
            Ok(tts) => tts,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "no TTS provider");
                return;
            }
        };

        let _ = self
            .outbound
            .send_json(
                session_id,
                serde_json::json!({
                    "type": "tts",
                    "state": "sentence_start",
                    "text": text,
                    "session_id": session_id,
                }),
            )
            .await;

        let started = std::time::Instant::now();
        let mut stream = match synthesizer.synthesize(text, &agent.voice_id).await {
            Ok(stream) => stream,
            Err(e) => {
                metrics::counter!("voice_fleet_provider_errors_total", "stage" => "tts")
                    .increment(1);
                tracing::error!(session_id = %session_id, error = %e, "TTS synthesis failed");
                return;
            }
        };

        while let Some(frame) = stream.next().await {
            if self.cancelled(sentence_id) {
                tracing::debug!(session_id = %session_id, "synthesis cancelled mid-sentence");
                return;
            }
            match frame {
                Ok(frame) => {
                    if let Err(e) = self.outbound.send_audio(session_id, frame).await {
                        tracing::warn!(session_id = %session_id, error = %e, "audio send failed");
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "TTS stream error");
                    return;
                }
            }
        }
        metrics::histogram!("voice_fleet_tts_seconds").record(started.elapsed().as_secs_f64());
    }

    async fn stream_file(&self, session_id: &str, sentence_id: u64, path: &std::path::Path) {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(session_id = %session_id, path = %path.display(), error = %e,
                    "audio file unreadable");
                return;
            }
        };

        let codec = self.ctx.audio_format();
        for (i, chunk) in data.chunks(FILE_CHUNK_BYTES).enumerate() {
            if self.cancelled(sentence_id) {
                tracing::debug!(session_id = %session_id, "file playback cancelled");
                return;
            }
            let frame = voice_fleet_core::AudioFrame::new(chunk.to_vec(), codec, i as u64);
            if let Err(e) = self.outbound.send_audio(session_id, frame).await {
                tracing::warn!(session_id = %session_id, error = %e, "file audio send failed");
                return;
            }
        }
    }
}
