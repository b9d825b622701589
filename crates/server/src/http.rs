//! HTTP router

use axum::{routing::get, Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::websocket::ws_handler;

/// Build the server router: the device WebSocket path plus health and
/// metrics endpoints
pub fn create_router(state: AppState) -> Router {
    let ws_path = state.settings.read().server.ws_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.count(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|h| h.render())
        .unwrap_or_default()
}
