//! Conversation memory port

use async_trait::async_trait;

use crate::conversation::Turn;
use crate::error::Result;

/// Long-term memory port
///
/// The engine only defines the port; stores are external. `recall` runs at
/// the start of a dialogue turn, `store` at session teardown when the agent
/// memory mode asks for it.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Fetch context relevant to the utterance, if any
    async fn recall(&self, device_id: &str, query: &str) -> Result<Option<String>>;

    /// Persist (typically summarize) the session history
    async fn store(&self, device_id: &str, turns: &[Turn]) -> Result<()>;

    /// Adapter name for logging
    fn name(&self) -> &str;
}
