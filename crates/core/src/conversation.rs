//! Conversation history
//!
//! Append-only during a live session. Memory summarization appends a new
//! system entry at teardown; past entries are never rewritten.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::llm::{Message, Role};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
    Tool,
}

impl From<TurnRole> for Role {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::User => Role::User,
            TurnRole::Assistant => Role::Assistant,
            TurnRole::System => Role::System,
            TurnRole::Tool => Role::Tool,
        }
    }
}

/// One entry in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    /// Set on tool-result turns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(TurnRole::System, content)
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            timestamp: Utc::now(),
        }
    }

    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Convert to a chat message for LLM input
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role.into(),
            content: self.content.clone(),
            tool_call_id: self.tool_call_id.clone(),
            tool_calls: Vec::new(),
        }
    }
}

/// Ordered, append-only sequence of turns for one session
#[derive(Default)]
pub struct ConversationHistory {
    turns: Mutex<Vec<Turn>>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn
    pub fn push(&self, turn: Turn) {
        self.turns.lock().push(turn);
    }

    /// Number of turns recorded so far
    pub fn turn_count(&self) -> usize {
        self.turns.lock().len()
    }

    /// Snapshot of the full history
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.lock().clone()
    }

    /// The most recent `n` turns
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let turns = self.turns.lock();
        let start = turns.len().saturating_sub(n);
        turns[start..].to_vec()
    }

    /// Chat messages for LLM input, bounded to the most recent `window` turns
    pub fn to_messages(&self, window: usize) -> Vec<Message> {
        self.recent(window).iter().map(Turn::to_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_order_is_preserved() {
        let history = ConversationHistory::new();
        history.push(Turn::user("hello"));
        history.push(Turn::assistant("hi there"));
        history.push(Turn::user("what time is it"));

        let turns = history.snapshot();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[2].content, "what time is it");
    }

    #[test]
    fn test_recent_window() {
        let history = ConversationHistory::new();
        for i in 0..10 {
            history.push(Turn::user(format!("turn {}", i)));
        }
        let recent = history.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "turn 7");
    }

    #[test]
    fn test_tool_turn_keeps_call_id() {
        let turn = Turn::tool("{\"ok\":true}", "call_1");
        let msg = turn.to_message();
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.role, Role::Tool);
    }
}
