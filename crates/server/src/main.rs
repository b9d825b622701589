//! Voice fleet server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_fleet_config::{
    load_settings, HttpAgentConfigProvider, Settings, StaticAgentConfigProvider,
};
use voice_fleet_core::{AgentConfigProvider, CloseReason};
use voice_fleet_server::{create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
    let env = std::env::var("VOICE_FLEET_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing is not up yet.
            eprintln!("warning: failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        "starting voice fleet server"
    );

    let metrics_handle = if settings.observability.metrics_enabled {
        init_metrics()
    } else {
        None
    };

    let agent_provider: Arc<dyn AgentConfigProvider> =
        match settings.providers.agent_api_url.clone() {
            Some(url) => {
                tracing::info!(url = %url, "agent configuration served by console API");
                Arc::new(HttpAgentConfigProvider::new(url, Duration::from_secs(30))?)
            }
            None => {
                tracing::info!("no console API configured, serving the default agent");
                Arc::new(StaticAgentConfigProvider::default())
            }
        };

    let bind_addr: SocketAddr = format!(
        "{}:{}",
        settings.server.host, settings.server.port
    )
    .parse()?;
    let ws_path = settings.server.ws_path.clone();

    let state = AppState::new(settings, agent_provider).with_metrics(metrics_handle);
    let monitor_shutdown = state.sessions.start_inactivity_monitor();

    let router = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, path = %ws_path, "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("shutting down, destroying live sessions");
    let _ = monitor_shutdown.send(true);
    state.sessions.destroy_all(CloseReason::ServerShutdown).await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn init_tracing(settings: &Settings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,voice_fleet=debug"));

    if settings.observability.log_json {
        let layer = tracing_subscriber::fmt::layer().json().with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
    } else {
        let layer = tracing_subscriber::fmt::layer().with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
    }
}
