//! Tool dispatch for the voice fleet engine
//!
//! - [`Tool`] — the port every function implements
//! - [`ToolRegistry`] — per-session name → tool map
//! - [`ToolHandler`] — classification (system vs. user level), execution
//!   with timeouts, unknown-tool handling
//! - [`mcp`] — the device-side tool protocol for clients that declared
//!   `features.mcp`
//! - [`builtin`] — system tools every session gets

pub mod builtin;
pub mod handler;
pub mod mcp;
pub mod registry;

pub use handler::{SystemContext, ToolHandler};
pub use mcp::McpDeviceClient;
pub use registry::{Tool, ToolKind, ToolRegistry};

use thiserror::Error;

/// Tool errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid arguments for {name}: {message}")]
    InvalidArguments { name: String, message: String },

    #[error("tool {name} timed out after {seconds}s")]
    Timeout { name: String, seconds: u64 },

    #[error("tool execution failed: {0}")]
    Execution(String),
}

impl ToolError {
    pub fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            name: name.into(),
            message: message.into(),
        }
    }
}
