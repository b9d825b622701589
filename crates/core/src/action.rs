//! Tool action results

use serde::{Deserialize, Serialize};

/// What the engine should do with a tool result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Nothing to say or do
    None,
    /// Speak the carried text directly
    Response,
    /// Tool failed; speak the error text, do not re-invoke the model
    Error,
    /// Result must go back to the model for another turn
    ReqLlm,
}

/// Structured result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action: Action,
    /// Text to speak (Response/Error) or to feed back to the model (ReqLlm)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Structured payload for downstream handlers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ActionResponse {
    pub fn none() -> Self {
        Self {
            action: Action::None,
            text: None,
            payload: None,
        }
    }

    pub fn response(text: impl Into<String>) -> Self {
        Self {
            action: Action::Response,
            text: Some(text.into()),
            payload: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            action: Action::Error,
            text: Some(text.into()),
            payload: None,
        }
    }

    pub fn req_llm(text: impl Into<String>) -> Self {
        Self {
            action: Action::ReqLlm,
            text: Some(text.into()),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
