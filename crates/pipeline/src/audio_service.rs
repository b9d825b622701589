//! VAD segmentation and ASR coordination
//!
//! Consumes `AudioDataReceived`, runs the session VAD, maintains the
//! speech-segmentation state machine, and feeds the session ASR adapter.
//! Emits `SpeechDetected` / `SpeechEnded` / `TextRecognized` and raises
//! `AbortRequest` on barge-in.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use voice_fleet_core::{
    AbortReason, AudioFrame, EventKind, ListenMode, SessionEvent, SpeechRecognizer, VadVerdict,
    VoiceActivityDetector,
};
use voice_fleet_runtime::{DiContainer, EventBus, SessionContext};

use crate::{PipelineError, TtsOrchestrator};

/// Segmentation tuning
#[derive(Debug, Clone)]
pub struct AudioServiceConfig {
    /// Trailing silence that closes a speech segment
    pub silence: Duration,
    /// Hard cap on segment duration
    pub max_segment: Duration,
    /// Frames of pre-roll replayed into ASR at speech start
    pub pre_roll_frames: usize,
    /// VAD suppression window after a wake word
    pub wake_cooldown: Duration,
    /// Forward non-final transcripts downstream
    pub surface_partials: bool,
    /// Spoken when recognition fails
    pub apology: String,
}

impl Default for AudioServiceConfig {
    fn default() -> Self {
        Self {
            silence: Duration::from_millis(700),
            max_segment: Duration::from_secs(15),
            pre_roll_frames: 5,
            wake_cooldown: Duration::from_secs(2),
            surface_partials: false,
            apology: "Sorry, I didn't catch that. Could you say it again?".to_string(),
        }
    }
}

#[derive(Default)]
struct SegmentState {
    have_voice: bool,
    last_voice_at: Option<Instant>,
    segment_started_at: Option<Instant>,
    pre_roll: VecDeque<AudioFrame>,
    cooldown_scheduled: bool,
}

struct SessionAudio {
    ctx: Arc<SessionContext>,
    state: Mutex<SegmentState>,
}

/// Per-process audio front-end; per-session state lives in the map
pub struct AudioProcessingService {
    container: Arc<DiContainer>,
    bus: Arc<EventBus>,
    config: AudioServiceConfig,
    sessions: DashMap<String, Arc<SessionAudio>>,
    /// Speaks the recognition apology; optional so the service can run
    /// headless in tests
    orchestrator: Option<Arc<TtsOrchestrator>>,
}

impl AudioProcessingService {
    pub fn new(container: Arc<DiContainer>, bus: Arc<EventBus>, config: AudioServiceConfig) -> Self {
        Self {
            container,
            bus,
            config,
            sessions: DashMap::new(),
            orchestrator: None,
        }
    }

    /// Attach the speech output path for error apologies
    pub fn with_orchestrator(mut self, orchestrator: Arc<TtsOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Subscribe the audio handler on the bus
    pub fn register_handlers(self: &Arc<Self>, bus: &EventBus) {
        let service = self.clone();
        bus.subscribe_async(EventKind::AudioDataReceived, move |event| {
            let service = service.clone();
            Box::pin(async move {
                if let SessionEvent::AudioDataReceived { session_id, frame } = event {
                    service.on_audio(&session_id, frame).await?;
                }
                Ok(())
            })
        });
    }

    pub fn open_session(&self, ctx: Arc<SessionContext>) {
        self.sessions.insert(
            ctx.session_id.clone(),
            Arc::new(SessionAudio {
                ctx,
                state: Mutex::new(SegmentState::default()),
            }),
        );
    }

    pub fn close_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    fn session(&self, session_id: &str) -> Result<Arc<SessionAudio>, PipelineError> {
        self.sessions
            .get(session_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| PipelineError::SessionNotOpen(session_id.to_string()))
    }

    /// Handle one inbound audio frame
    pub async fn on_audio(
        &self,
        session_id: &str,
        frame: AudioFrame,
    ) -> voice_fleet_core::Result<()> {
        let Ok(session) = self.session(session_id) else {
            // Frame raced session teardown; drop it.
            return Ok(());
        };
        let ctx = &session.ctx;

        // Wake-word cooldown: ignore the tail of the wake response so the
        // engine does not trigger on itself.
        if ctx.just_woken_up() {
            self.ensure_cooldown_task(&session);
            return Ok(());
        }

        let mode = ctx.listen_mode();
        if mode == ListenMode::Manual {
            return self.on_audio_manual(session_id, &session, frame).await;
        }

        let agent = ctx.agent();
        let vad: Arc<dyn VoiceActivityDetector> = self
            .container
            .resolve_session(session_id, &agent.providers.vad)
            .map_err(|e| voice_fleet_core::Error::Configuration(e.to_string()))?;
        let verdict = vad.detect(&frame).await?;

        let (transitioned_to_voice, flush): (bool, Vec<AudioFrame>) = {
            let mut state = session.state.lock();
            let now = Instant::now();
            if verdict.is_voice {
                state.last_voice_at = Some(now);
            }
            if verdict.is_voice && !state.have_voice {
                state.have_voice = true;
                state.segment_started_at = Some(now);
                let flush = state.pre_roll.drain(..).collect();
                (true, flush)
            } else {
                if !state.have_voice {
                    state.pre_roll.push_back(frame.clone());
                    while state.pre_roll.len() > self.config.pre_roll_frames {
                        state.pre_roll.pop_front();
                    }
                }
                (false, Vec::new())
            }
        };

        if transitioned_to_voice {
            ctx.set_client_have_voice(true);

            // Barge-in: user spoke while the engine was speaking.
            if ctx.client_is_speaking() {
                self.bus
                    .publish(SessionEvent::AbortRequest {
                        session_id: session_id.to_string(),
                        reason: AbortReason::UserInterrupt,
                    })
                    .await;
            }

            self.bus
                .publish(SessionEvent::SpeechDetected {
                    session_id: session_id.to_string(),
                })
                .await;

            let asr = self.recognizer(session_id, ctx)?;
            for buffered in flush {
                let _ = asr.feed(&buffered, &VadVerdict::silence(0.0)).await;
            }
        }

        let in_segment = session.state.lock().have_voice;
        if in_segment || verdict.is_voice {
            let asr = self.recognizer(session_id, ctx)?;
            match asr.feed(&frame, &verdict).await {
                Ok(Some(partial)) if self.config.surface_partials && !partial.is_final => {
                    self.bus
                        .publish(SessionEvent::TextRecognized {
                            session_id: session_id.to_string(),
                            text: partial.text,
                            is_final: false,
                        })
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    metrics::counter!("voice_fleet_provider_errors_total", "stage" => "asr")
                        .increment(1);
                    tracing::warn!(session_id = %session_id, error = %e, "ASR feed failed");
                }
            }
        }

        // Segment close conditions: trailing silence or max duration.
        let should_close = {
            let state = session.state.lock();
            if !state.have_voice {
                false
            } else {
                let silence_elapsed = state
                    .last_voice_at
                    .map(|t| t.elapsed() >= self.config.silence)
                    .unwrap_or(false);
                let over_length = state
                    .segment_started_at
                    .map(|t| t.elapsed() >= self.config.max_segment)
                    .unwrap_or(false);
                silence_elapsed || over_length
            }
        };
        if should_close {
            self.close_segment(session_id).await?;
        }
        Ok(())
    }

    /// Manual-mode path: the client brackets segments with listen frames
    async fn on_audio_manual(
        &self,
        session_id: &str,
        session: &SessionAudio,
        frame: AudioFrame,
    ) -> voice_fleet_core::Result<()> {
        let ctx = &session.ctx;
        if !ctx.client_have_voice() {
            return Ok(());
        }
        {
            let mut state = session.state.lock();
            if !state.have_voice {
                state.have_voice = true;
                state.segment_started_at = Some(Instant::now());
            }
        }
        let asr = self.recognizer(session_id, ctx)?;
        let verdict = VadVerdict::voice(1.0);
        if let Err(e) = asr.feed(&frame, &verdict).await {
            tracing::warn!(session_id = %session_id, error = %e, "ASR feed failed");
        }
        Ok(())
    }

    /// Close the current segment and publish the recognition result
    ///
    /// Also the entry point for `listen stop` in manual mode.
    pub async fn close_segment(&self, session_id: &str) -> voice_fleet_core::Result<()> {
        let Ok(session) = self.session(session_id) else {
            return Ok(());
        };
        let ctx = &session.ctx;

        let was_in_segment = {
            let mut state = session.state.lock();
            let was = state.have_voice;
            state.have_voice = false;
            state.last_voice_at = None;
            state.segment_started_at = None;
            was
        };
        if !was_in_segment {
            return Ok(());
        }

        ctx.set_client_have_voice(false);
        ctx.set_client_voice_stop(false);

        let agent = ctx.agent();
        if let Ok(vad) = self
            .container
            .resolve_session::<Arc<dyn VoiceActivityDetector>>(session_id, &agent.providers.vad)
        {
            vad.reset();
        }

        self.bus
            .publish(SessionEvent::SpeechEnded {
                session_id: session_id.to_string(),
            })
            .await;

        let asr = self.recognizer(session_id, ctx)?;
        let started = std::time::Instant::now();
        match asr.finalize().await {
            Ok(transcript) => {
                metrics::histogram!("voice_fleet_asr_seconds")
                    .record(started.elapsed().as_secs_f64());
                asr.reset();
                let text = transcript.text.trim().to_string();
                if text.is_empty() {
                    tracing::debug!(session_id = %session_id, "segment closed with empty transcript");
                    return Ok(());
                }
                tracing::info!(session_id = %session_id, text = %text, "speech recognized");
                self.bus
                    .publish(SessionEvent::TextRecognized {
                        session_id: session_id.to_string(),
                        text,
                        is_final: true,
                    })
                    .await;
            }
            Err(e) => {
                metrics::counter!("voice_fleet_provider_errors_total", "stage" => "asr")
                    .increment(1);
                tracing::error!(session_id = %session_id, error = %e, "ASR finalize failed");
                asr.reset();
                if let Some(orchestrator) = &self.orchestrator {
                    if let Err(e) = orchestrator.say(session_id, &self.config.apology) {
                        tracing::warn!(session_id = %session_id, error = %e, "apology failed");
                    }
                }
            }
        }
        Ok(())
    }

    fn recognizer(
        &self,
        session_id: &str,
        ctx: &SessionContext,
    ) -> voice_fleet_core::Result<Arc<dyn SpeechRecognizer>> {
        self.container
            .resolve_session(session_id, &ctx.agent().providers.asr)
            .map_err(|e| voice_fleet_core::Error::Configuration(e.to_string()))
    }

    /// One-shot task that clears `just_woken_up` after the cooldown
    fn ensure_cooldown_task(&self, session: &Arc<SessionAudio>) {
        let mut state = session.state.lock();
        if state.cooldown_scheduled {
            return;
        }
        state.cooldown_scheduled = true;
        drop(state);

        let cooldown = self.config.wake_cooldown;
        let session = session.clone();
        let spawn_result = session.ctx.lifecycle().spawn("wake-cooldown", {
            let session = session.clone();
            async move {
                tokio::time::sleep(cooldown).await;
                session.ctx.set_just_woken_up(false);
                session.state.lock().cooldown_scheduled = false;
            }
        });
        if spawn_result.is_err() {
            session.state.lock().cooldown_scheduled = false;
        }
    }
}
