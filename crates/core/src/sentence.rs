//! Sentence units: the atomic work items of speech output
//!
//! A single utterance is bracketed by exactly one `First` and one `Last`
//! unit with zero or more `Middle` units between them. The sentence id is
//! constant within a bracket and strictly increasing across brackets.

use std::path::PathBuf;

/// Position of a unit within an utterance bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceType {
    First,
    Middle,
    Last,
}

/// What a unit carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentenceContent {
    /// Text to synthesize
    Text(String),
    /// Control marker, no audio; payload names the action
    Action(String),
    /// Pre-encoded audio file streamed without the TTS provider
    File(PathBuf),
}

/// Atomic unit of TTS work
#[derive(Debug, Clone)]
pub struct SentenceUnit {
    pub sentence_id: u64,
    pub sentence_type: SentenceType,
    pub content: SentenceContent,
}

impl SentenceUnit {
    /// Bracket opener, optionally carrying leading text
    pub fn first(sentence_id: u64, text: impl Into<String>) -> Self {
        Self {
            sentence_id,
            sentence_type: SentenceType::First,
            content: SentenceContent::Text(text.into()),
        }
    }

    /// Text unit inside a bracket
    pub fn middle(sentence_id: u64, text: impl Into<String>) -> Self {
        Self {
            sentence_id,
            sentence_type: SentenceType::Middle,
            content: SentenceContent::Text(text.into()),
        }
    }

    /// Audio-file unit inside a bracket
    pub fn file(sentence_id: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            sentence_id,
            sentence_type: SentenceType::Middle,
            content: SentenceContent::File(path.into()),
        }
    }

    /// Action marker inside a bracket
    pub fn action(sentence_id: u64, name: impl Into<String>) -> Self {
        Self {
            sentence_id,
            sentence_type: SentenceType::Middle,
            content: SentenceContent::Action(name.into()),
        }
    }

    /// Bracket closer
    pub fn last(sentence_id: u64) -> Self {
        Self {
            sentence_id,
            sentence_type: SentenceType::Last,
            content: SentenceContent::Text(String::new()),
        }
    }

    /// Text payload if this unit carries one
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            SentenceContent::Text(t) => Some(t),
            _ => None,
        }
    }
}
