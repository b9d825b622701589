//! System tools every session gets
//!
//! These are the engine-level functions: clock, volume, session exit, and
//! local music playback. Device-specific functions arrive over MCP.

use async_trait::async_trait;
use std::path::PathBuf;

use voice_fleet_core::{ActionResponse, CloseReason, SessionEvent, ToolDefinition};

use crate::handler::SystemContext;
use crate::registry::{Tool, ToolKind, ToolRegistry};
use crate::ToolError;

/// Install the built-in set into a fresh session registry
pub fn install(registry: &mut ToolRegistry) {
    registry.register(GetTime);
    registry.register(ExitSession);
    registry.register(ChangeVolume);
    registry.register(PlayMusic::default());
}

/// Current wall-clock time
pub struct GetTime;

#[async_trait]
impl Tool for GetTime {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_time",
            "Get the current date and time.",
            serde_json::json!({"type": "object", "properties": {}}),
        )
    }

    async fn execute(
        &self,
        _system: Option<&SystemContext>,
        _arguments: serde_json::Value,
    ) -> Result<ActionResponse, ToolError> {
        let now = chrono::Local::now();
        Ok(ActionResponse::req_llm(format!(
            "The current time is {}.",
            now.format("%A %H:%M, %B %e %Y")
        )))
    }
}

/// End the conversation at the user's request
pub struct ExitSession;

#[async_trait]
impl Tool for ExitSession {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "exit_session",
            "End the conversation when the user says goodbye.",
            serde_json::json!({"type": "object", "properties": {}}),
        )
    }

    fn kind(&self) -> ToolKind {
        ToolKind::SystemCtl
    }

    async fn execute(
        &self,
        system: Option<&SystemContext>,
        _arguments: serde_json::Value,
    ) -> Result<ActionResponse, ToolError> {
        let system = system.ok_or_else(|| ToolError::Execution("missing system context".into()))?;
        system
            .bus
            .publish(SessionEvent::SessionClosing {
                session_id: system.session_id.clone(),
                reason: CloseReason::ClientClosed,
            })
            .await;
        Ok(ActionResponse::response("Goodbye!"))
    }
}

/// Set the device speaker volume via an IoT command
pub struct ChangeVolume;

#[async_trait]
impl Tool for ChangeVolume {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "change_volume",
            "Set the device speaker volume, 0-100.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "volume": {"type": "integer", "minimum": 0, "maximum": 100}
                },
                "required": ["volume"]
            }),
        )
    }

    fn kind(&self) -> ToolKind {
        ToolKind::SystemCtl
    }

    async fn execute(
        &self,
        system: Option<&SystemContext>,
        arguments: serde_json::Value,
    ) -> Result<ActionResponse, ToolError> {
        let volume = arguments
            .get("volume")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ToolError::invalid("change_volume", "volume is required"))?;
        if !(0..=100).contains(&volume) {
            return Err(ToolError::invalid("change_volume", "volume must be 0-100"));
        }
        let system = system.ok_or_else(|| ToolError::Execution("missing system context".into()))?;

        system
            .outbound
            .send_json(
                &system.session_id,
                serde_json::json!({
                    "type": "iot",
                    "commands": [{
                        "name": "Speaker",
                        "method": "SetVolume",
                        "parameters": {"volume": volume}
                    }]
                }),
            )
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(ActionResponse::response(format!(
            "Volume set to {}.",
            volume
        )))
    }
}

/// Play a local music file by name
pub struct PlayMusic {
    music_dir: PathBuf,
}

impl Default for PlayMusic {
    fn default() -> Self {
        Self {
            music_dir: PathBuf::from("music"),
        }
    }
}

impl PlayMusic {
    pub fn new(music_dir: impl Into<PathBuf>) -> Self {
        Self {
            music_dir: music_dir.into(),
        }
    }

    /// Case-insensitive substring match over the library
    async fn resolve(&self, song_name: &str) -> Option<PathBuf> {
        let needle = song_name.to_lowercase();
        let mut entries = tokio::fs::read_dir(&self.music_dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.to_lowercase().contains(&needle) {
                return Some(path);
            }
        }
        None
    }
}

#[async_trait]
impl Tool for PlayMusic {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "play_music",
            "Play a song from the local library by name or genre.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "song_name": {"type": "string", "description": "Song name or genre"}
                },
                "required": ["song_name"]
            }),
        )
    }

    async fn execute(
        &self,
        _system: Option<&SystemContext>,
        arguments: serde_json::Value,
    ) -> Result<ActionResponse, ToolError> {
        let song_name = arguments
            .get("song_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::invalid("play_music", "song_name is required"))?;

        match self.resolve(song_name).await {
            Some(path) => Ok(ActionResponse::response(format!("Playing {}", song_name))
                .with_payload(serde_json::json!({"file": path.to_string_lossy()}))),
            None => Ok(ActionResponse::error(format!(
                "I couldn't find {} in the library.",
                song_name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_time_requests_llm_turn() {
        let response = GetTime
            .execute(None, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(response.action, voice_fleet_core::Action::ReqLlm);
        assert!(response.text.unwrap().contains("current time"));
    }

    #[tokio::test]
    async fn test_change_volume_rejects_out_of_range() {
        let result = ChangeVolume
            .execute(None, serde_json::json!({"volume": 250}))
            .await;
        // Fails before it ever needs the system context.
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_play_music_resolves_file() {
        let dir = std::env::temp_dir().join(format!("music-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("Smooth Jazz.opus"), b"xx").await.unwrap();

        let tool = PlayMusic::new(&dir);
        let response = tool
            .execute(None, serde_json::json!({"song_name": "jazz"}))
            .await
            .unwrap();
        assert_eq!(response.action, voice_fleet_core::Action::Response);
        let payload = response.payload.unwrap();
        assert!(payload["file"].as_str().unwrap().contains("Smooth Jazz"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_play_music_unknown_song_is_error() {
        let tool = PlayMusic::new("/nonexistent-library");
        let response = tool
            .execute(None, serde_json::json!({"song_name": "jazz"}))
            .await
            .unwrap();
        assert_eq!(response.action, voice_fleet_core::Action::Error);
    }
}
