//! Voice fleet server
//!
//! WebSocket endpoint, message routing, session lifecycle, and the
//! composition root that wires the pipeline together.

pub mod control;
pub mod http;
pub mod metrics;
pub mod protocol;
pub mod router;
pub mod session;
pub mod state;
pub mod transport;
pub mod websocket;

pub use http::create_router;
pub use metrics::init_metrics;
pub use protocol::{AudioParams, InboundMessage, ListenState};
pub use router::MessageRouter;
pub use session::SessionManager;
pub use state::AppState;
pub use transport::{FrameSink, Transport};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session error: {0}")]
    Session(String),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("capacity reached ({0} sessions)")]
    Capacity(usize),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Core(#[from] voice_fleet_core::Error),

    #[error(transparent)]
    Runtime(#[from] voice_fleet_runtime::RuntimeError),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::Handshake(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Capacity(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Configuration(_) | ServerError::Core(_) | ServerError::Runtime(_) => {
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
