//! Deterministic adapters for tests and vendor-free bring-up
//!
//! Each adapter plays back whatever the test scripted, with the same
//! streaming shapes real vendors produce.

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use std::collections::VecDeque;

use voice_fleet_core::{
    AudioCodec, AudioFrame, AudioStream, ChatRequest, ChunkStream, FinishReason, LanguageModel,
    LlmChunk, Result, SpeechRecognizer, SpeechSynthesizer, ToolCall, Transcript, VadVerdict,
};

/// ASR that returns queued transcripts on segment close
#[derive(Default)]
pub struct ScriptedAsr {
    queue: Mutex<VecDeque<String>>,
    frames_fed: Mutex<usize>,
}

impl ScriptedAsr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the transcript the next finalized segment should produce
    pub fn push_transcript(&self, text: impl Into<String>) {
        self.queue.lock().push_back(text.into());
    }

    pub fn frames_fed(&self) -> usize {
        *self.frames_fed.lock()
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedAsr {
    async fn feed(&self, _frame: &AudioFrame, _vad: &VadVerdict) -> Result<Option<Transcript>> {
        *self.frames_fed.lock() += 1;
        Ok(None)
    }

    async fn finalize(&self) -> Result<Transcript> {
        let text = self.queue.lock().pop_front().unwrap_or_default();
        Ok(Transcript::final_text(text))
    }

    fn reset(&self) {
        *self.frames_fed.lock() = 0;
    }

    fn name(&self) -> &str {
        "scripted-asr"
    }
}

/// One scripted model turn
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub text_chunks: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ScriptedTurn {
    pub fn text(chunks: &[&str]) -> Self {
        Self {
            text_chunks: chunks.iter().map(|c| c.to_string()).collect(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            text_chunks: Vec::new(),
            tool_calls: vec![call],
        }
    }
}

/// LLM that replays scripted turns in order
#[derive(Default)]
pub struct ScriptedLlm {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    /// Tool schemas seen on each request, for asserting what was offered
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_turn(&self, turn: ScriptedTurn) {
        self.turns.lock().push_back(turn);
    }

    /// Requests observed so far (cloned)
    pub fn seen_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream> {
        self.requests.lock().push(request);
        let turn = self.turns.lock().pop_front().unwrap_or_default();

        let had_tools = !turn.tool_calls.is_empty();
        let mut items: Vec<Result<LlmChunk>> = Vec::new();
        for chunk in turn.text_chunks {
            items.push(Ok(LlmChunk::Text(chunk)));
        }
        for call in turn.tool_calls {
            items.push(Ok(LlmChunk::ToolCall(call)));
        }
        items.push(Ok(LlmChunk::Done(if had_tools {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        })));

        Ok(Box::pin(stream::iter(items)))
    }

    fn model_name(&self) -> &str {
        "scripted-llm"
    }
}

/// TTS that emits fixed-size PCM16 frames per sentence
pub struct ScriptedTts {
    frames_per_sentence: usize,
    samples_per_frame: usize,
}

impl Default for ScriptedTts {
    fn default() -> Self {
        Self {
            frames_per_sentence: 3,
            samples_per_frame: 960,
        }
    }
}

impl ScriptedTts {
    pub fn new(frames_per_sentence: usize, samples_per_frame: usize) -> Self {
        Self {
            frames_per_sentence,
            samples_per_frame,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedTts {
    async fn synthesize(&self, text: &str, _voice_id: &str) -> Result<AudioStream> {
        // Deterministic payload derived from the text so tests can tell
        // frames of different sentences apart.
        let seed = text.bytes().fold(0u8, u8::wrapping_add);
        let frames: Vec<Result<AudioFrame>> = (0..self.frames_per_sentence)
            .map(|i| {
                let payload = vec![seed; self.samples_per_frame * 2];
                Ok(AudioFrame::new(payload, AudioCodec::Pcm16, i as u64))
            })
            .collect();
        Ok(Box::pin(stream::iter(frames)))
    }

    fn name(&self) -> &str {
        "scripted-tts"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scripted_asr_finalize_order() {
        let asr = ScriptedAsr::new();
        asr.push_transcript("first");
        asr.push_transcript("second");

        assert_eq!(asr.finalize().await.unwrap().text, "first");
        assert_eq!(asr.finalize().await.unwrap().text, "second");
        assert_eq!(asr.finalize().await.unwrap().text, "");
    }

    #[tokio::test]
    async fn test_scripted_llm_ends_with_done() {
        let llm = ScriptedLlm::new();
        llm.push_turn(ScriptedTurn::text(&["Hello ", "world."]));

        let mut stream = llm.chat_stream(ChatRequest::default()).await.unwrap();
        let mut texts = Vec::new();
        let mut done = false;
        while let Some(chunk) = stream.next().await {
            match chunk.unwrap() {
                LlmChunk::Text(t) => texts.push(t),
                LlmChunk::Done(reason) => {
                    assert_eq!(reason, FinishReason::Stop);
                    done = true;
                }
                LlmChunk::ToolCall(_) => panic!("no tool call scripted"),
            }
        }
        assert!(done);
        assert_eq!(texts.join(""), "Hello world.");
    }

    #[tokio::test]
    async fn test_scripted_tts_frame_count() {
        let tts = ScriptedTts::new(4, 480);
        let stream = tts.synthesize("hi", "default").await.unwrap();
        let frames: Vec<_> = stream.collect().await;
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].as_ref().unwrap().len(), 960);
    }
}
