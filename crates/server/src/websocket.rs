//! WebSocket endpoint
//!
//! One connection per device. The first frame must be `hello`; a session
//! is created from it, the connection is registered with the transport,
//! and the read loop feeds the router until the peer goes away.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::HeaderMap,
    response::Response,
};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;

use voice_fleet_core::{CloseReason, Error, Outbound, Result};

use crate::protocol::{self, InboundMessage};
use crate::state::AppState;
use crate::transport::FrameSink;

/// The first frame must arrive within this window
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Writer half of an axum WebSocket as a transport sink
struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sender
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        self.sender
            .send(Message::Binary(data))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.sender
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.sender
            .send(Message::Close(None))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

/// Handle the upgrade at the device path
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> std::result::Result<Response, axum::http::StatusCode> {
    let device_id = header_value(&headers, "device-id")
        .ok_or(axum::http::StatusCode::BAD_REQUEST)?;
    let client_id = header_value(&headers, "client-id").unwrap_or_else(|| device_id.clone());
    let client_ip = header_value(&headers, "x-real-ip").unwrap_or_else(|| addr.ip().to_string());
    let from_gateway = header_value(&headers, "x-transport")
        .map(|v| v == "mqtt-gateway")
        .unwrap_or(false);

    Ok(ws.on_upgrade(move |socket| {
        handle_socket(socket, state, device_id, client_id, client_ip, from_gateway)
    }))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    device_id: String,
    client_id: String,
    client_ip: String,
    from_gateway: bool,
) {
    let (sender, mut receiver) = socket.split();
    let mut sink = WsSink { sender };

    // Handshake: the first text frame must be hello.
    let hello = match wait_for_hello(&mut receiver).await {
        Ok(hello) => hello,
        Err(e) => {
            tracing::warn!(device_id = %device_id, error = %e, "handshake failed");
            let _ = sink.close().await;
            return;
        }
    };

    let ctx = match state
        .sessions
        .create_session(&device_id, &client_id, &client_ip, from_gateway)
        .await
    {
        Ok(ctx) => ctx,
        Err(e) => {
            // Configuration failures are fatal for the session; close with
            // a diagnostic so the device can back off.
            tracing::error!(device_id = %device_id, error = %e, "session creation failed");
            let _ = sink
                .send_text(
                    serde_json::json!({"type": "error", "message": e.to_string()}).to_string(),
                )
                .await;
            let _ = sink.close().await;
            return;
        }
    };
    let session_id = ctx.session_id.clone();

    state
        .transport
        .register(&session_id, Box::new(sink), from_gateway);

    if let InboundMessage::Hello {
        audio_params,
        features,
    } = hello
    {
        if let Some(params) = audio_params {
            if let Some(codec) = voice_fleet_core::AudioCodec::from_wire(&params.format) {
                ctx.set_audio_format(codec);
            }
        }
        let wants_mcp = features
            .get("mcp")
            .map(|v| v.as_bool().unwrap_or(true))
            .unwrap_or(false);
        ctx.set_features(features);
        if wants_mcp {
            state.control.enable_mcp(&ctx);
        }
    }

    let audio_settings = state.settings.read().audio.clone();
    let welcome = protocol::hello_reply(&session_id, &audio_settings);
    ctx.set_welcome(welcome.clone());
    if let Err(e) = state.transport.send_json(&session_id, welcome).await {
        tracing::error!(session_id = %session_id, error = %e, "hello reply failed");
        state
            .sessions
            .destroy_session(&session_id, CloseReason::TransportError)
            .await;
        return;
    }

    spawn_heartbeat(&state, &ctx);

    // Read loop. Ordered per session: one producer feeding the bus.
    let close_reason = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                state.router.route_text(&session_id, text).await;
            }
            Some(Ok(Message::Binary(data))) => {
                state.router.route_binary(&session_id, data).await;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                ctx.touch();
            }
            Some(Ok(Message::Close(_))) | None => break CloseReason::ClientClosed,
            Some(Err(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "websocket error");
                break CloseReason::TransportError;
            }
        }
    };

    state.sessions.destroy_session(&session_id, close_reason).await;
    tracing::info!(session_id = %session_id, "connection closed");
}

async fn wait_for_hello(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
) -> Result<InboundMessage> {
    let deadline = tokio::time::sleep(HANDSHAKE_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                return Err(Error::Transport("handshake timeout".into()));
            }
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<InboundMessage>(&text) {
                        Ok(hello @ InboundMessage::Hello { .. }) => return Ok(hello),
                        Ok(_) => {
                            return Err(Error::Transport("first frame was not hello".into()))
                        }
                        Err(e) => {
                            return Err(Error::Transport(format!("malformed hello: {}", e)))
                        }
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(_)) => {
                    return Err(Error::Transport("binary frame before hello".into()));
                }
                Some(Err(e)) => return Err(Error::Transport(e.to_string())),
                None => return Err(Error::Transport("closed during handshake".into())),
            }
        }
    }
}

/// Periodic pings keep NAT mappings alive and detect dead peers
fn spawn_heartbeat(state: &AppState, ctx: &std::sync::Arc<voice_fleet_runtime::SessionContext>) {
    let interval = Duration::from_secs(state.settings.read().server.heartbeat_secs);
    let transport = state.transport.clone();
    let session_id = ctx.session_id.clone();
    let result = ctx.lifecycle().spawn("heartbeat", async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            if transport.ping(&session_id).await.is_err() {
                tracing::debug!(session_id = %session_id, "heartbeat failed, peer gone");
                break;
            }
        }
    });
    if let Err(e) = result {
        tracing::debug!(error = %e, "heartbeat not started");
    }
}
