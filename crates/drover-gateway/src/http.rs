//! HTTP side channels and the client WebSocket endpoint.
//!
//! Served on the same port: `GET /health`, `POST /send-message`,
//! `POST /supervisor/control`, and the `GET /ws` upgrade every downstream
//! client (supervisor, humans, relays) attaches through.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use drover_spec::validate::parse_supervisor_action;
use drover_spec::{ClientFrame, InstanceInfo, Task};

use crate::hub::{HubCommand, HubHandle};

#[derive(Clone)]
pub struct HttpState {
    pub hub: HubHandle,
    pub instance: InstanceInfo,
    next_client_id: Arc<AtomicU64>,
}

impl HttpState {
    pub fn new(hub: HubHandle, instance: InstanceInfo) -> Self {
        Self {
            hub,
            instance,
            next_client_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/send-message", post(send_message))
        .route("/supervisor/control", post(supervisor_control))
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    oc_connected: bool,
    agent_busy: bool,
    clients: usize,
    humans: usize,
    supervisor_connected: bool,
    task: Option<Task>,
    instance: InstanceInfo,
}

async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    match state.hub.snapshot().await {
        Some(snap) => Json(HealthResponse {
            ok: true,
            oc_connected: snap.oc_connected,
            agent_busy: snap.agent_busy,
            clients: snap.clients,
            humans: snap.humans,
            supervisor_connected: snap.supervisor_connected,
            task: snap.task,
            instance: state.instance.clone(),
        })
        .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct SendMessageResponse {
    delivered: bool,
}

async fn send_message(
    State(state): State<HttpState>,
    Json(request): Json<SendMessageRequest>,
) -> Json<SendMessageResponse> {
    let delivered = state.hub.deliver_message(request.message).await;
    Json(SendMessageResponse { delivered })
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: String,
}

#[derive(Debug, Serialize)]
struct ControlResponse {
    forwarded: bool,
}

async fn supervisor_control(
    State(state): State<HttpState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, (StatusCode, String)> {
    let action = parse_supervisor_action(&request.action)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let forwarded = state.hub.supervisor_control(action).await;
    Ok(Json(ControlResponse { forwarded }))
}

async fn ws_upgrade(State(state): State<HttpState>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| client_connection(state, socket))
}

/// Pump one downstream client: hub frames out, client frames in.
async fn client_connection(state: HttpState, socket: WebSocket) {
    let id = state.next_client_id.fetch_add(1, Ordering::Relaxed);
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    state.hub.send(HubCommand::ClientConnected {
        id,
        sender: frame_tx,
    });

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = frame_rx.recv() => {
                let Some(frame) = outbound else { break };
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        debug!(error = %e, "failed to encode frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(frame) => {
                                state.hub.send(HubCommand::ClientFrame { id, frame });
                            }
                            Err(e) => {
                                debug!(client = id, error = %e, "unknown client frame dropped");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(client = id, error = %e, "client socket error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.send(HubCommand::ClientDisconnected { id });
}

/// Instance awareness injected by the container manager, with host
/// fallbacks for local development.
pub fn instance_info_from_env() -> InstanceInfo {
    let host_cpus = std::env::var("HOST_CPUS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| num_cpus::get() as u32);
    let host_memory_mb = std::env::var("HOST_MEMORY_MB")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    InstanceInfo {
        instance_type: std::env::var("INSTANCE_TYPE").ok(),
        cpus: std::env::var("INSTANCE_CPUS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(host_cpus),
        memory_mb: std::env::var("INSTANCE_MEMORY_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(host_memory_mb),
        host_cpus,
        host_memory_mb,
    }
}
