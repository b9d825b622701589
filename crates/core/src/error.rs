//! Error types shared across the engine

use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// A provider call (VAD/ASR/TTS/LLM/intent/memory) failed
    #[error("{stage} provider error: {message}")]
    Provider {
        stage: &'static str,
        message: String,
    },

    /// Bad or missing configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Send attempted to a session with no registered connection
    #[error("session {0} is not connected")]
    NotConnected(String),

    /// A provider call exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a provider failure
    pub fn provider(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            stage,
            message: message.into(),
        }
    }
}

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, Error>;
