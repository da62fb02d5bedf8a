//! Project chat relay: operator WebSocket <-> gateway WebSocket.
//!
//! Frames are forwarded opaquely. Close codes from the gateway side are
//! sanitized before reaching the operator (1000 and 3000-4999 pass
//! through, everything else becomes 1000) and close reasons are truncated
//! to the protocol's 123-byte limit.

use axum::extract::ws::{CloseFrame, Message as AxMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TgCloseFrame;
use tokio_tungstenite::tungstenite::Message as TgMessage;
use tracing::debug;

use drover_fleet::ChatEndpoint;

use crate::auth::token_valid;
use crate::error::ApiError;
use crate::state::ApiState;

/// WebSocket close reasons may be at most 123 bytes
const MAX_CLOSE_REASON: usize = 123;

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub token: Option<String>,
}

pub async fn chat_ws(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<ChatQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    // WS upgrades authenticate via the token query parameter
    let authorized = query
        .token
        .as_deref()
        .map(|token| token_valid(&state.store, token))
        .unwrap_or(false);
    if !authorized {
        return ApiError::Unauthorized.into_response();
    }

    if let Err(e) = state.store.get_project(&name) {
        return ApiError::from(e).into_response();
    }

    let endpoint = match state.manager.chat_endpoint(&name).await {
        Ok(endpoint) => endpoint,
        Err(e) => return ApiError::from(e).into_response(),
    };

    upgrade.on_upgrade(move |socket| relay(socket, endpoint))
}

async fn relay(client: WebSocket, endpoint: ChatEndpoint) {
    let upstream = match connect(&endpoint).await {
        Ok(ws) => ws,
        Err(reason) => {
            debug!(reason = %reason, "chat upstream connect failed");
            close_client(client, 1011, &reason).await;
            return;
        }
    };

    let (mut up_sink, mut up_stream) = upstream.split();
    let (mut down_sink, mut down_stream) = client.split();

    loop {
        tokio::select! {
            from_client = down_stream.next() => {
                match from_client {
                    Some(Ok(AxMessage::Close(_))) | Some(Err(_)) | None => {
                        // client close closes the upstream
                        let _ = up_sink.send(TgMessage::Close(None)).await;
                        break;
                    }
                    Some(Ok(message)) => {
                        if up_sink.send(client_to_gateway(message)).await.is_err() {
                            break;
                        }
                    }
                }
            }

            from_upstream = up_stream.next() => {
                match from_upstream {
                    Some(Ok(TgMessage::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1000, String::new()));
                        let _ = down_sink
                            .send(AxMessage::Close(Some(CloseFrame {
                                code: sanitize_close_code(code),
                                reason: truncate_reason(&reason).into(),
                            })))
                            .await;
                        break;
                    }
                    Some(Ok(message)) => {
                        if down_sink.send(gateway_to_client(message)).await.is_err() {
                            let _ = up_sink.send(TgMessage::Close(None)).await;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        // upstream error closes the client with 1011
                        let reason = truncate_reason(&e.to_string());
                        let _ = down_sink
                            .send(AxMessage::Close(Some(CloseFrame {
                                code: 1011,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => {
                        let _ = down_sink.send(AxMessage::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }
}

async fn connect(
    endpoint: &ChatEndpoint,
) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    String,
> {
    let mut request = endpoint
        .ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;
    if let Some(bearer) = &endpoint.bearer {
        let value = format!("Bearer {bearer}")
            .parse()
            .map_err(|_| "invalid bearer".to_string())?;
        request
            .headers_mut()
            .insert(axum::http::header::AUTHORIZATION, value);
    }
    let (ws, _) = connect_async(request).await.map_err(|e| e.to_string())?;
    Ok(ws)
}

async fn close_client(mut client: WebSocket, code: u16, reason: &str) {
    let _ = client
        .send(AxMessage::Close(Some(CloseFrame {
            code,
            reason: truncate_reason(reason).into(),
        })))
        .await;
}

fn client_to_gateway(message: AxMessage) -> TgMessage {
    match message {
        AxMessage::Text(text) => TgMessage::Text(text.to_string().into()),
        AxMessage::Binary(data) => TgMessage::Binary(data.to_vec().into()),
        AxMessage::Ping(data) => TgMessage::Ping(data.to_vec().into()),
        AxMessage::Pong(data) => TgMessage::Pong(data.to_vec().into()),
        AxMessage::Close(frame) => TgMessage::Close(frame.map(|f| TgCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.to_string().into(),
        })),
    }
}

fn gateway_to_client(message: TgMessage) -> AxMessage {
    match message {
        TgMessage::Text(text) => AxMessage::Text(text.to_string().into()),
        TgMessage::Binary(data) => AxMessage::Binary(data.to_vec().into()),
        TgMessage::Ping(data) => AxMessage::Ping(data.to_vec().into()),
        TgMessage::Pong(data) => AxMessage::Pong(data.to_vec().into()),
        TgMessage::Close(frame) => AxMessage::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.to_string().into(),
        })),
        TgMessage::Frame(_) => AxMessage::Binary(Vec::new().into()),
    }
}

/// Relay 1000 and the application range 3000-4999; substitute 1000 for
/// everything else.
fn sanitize_close_code(code: u16) -> u16 {
    if code == 1000 || (3000..=4999).contains(&code) {
        code
    } else {
        1000
    }
}

/// Truncate to the 123-byte close-reason limit on a char boundary.
fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while end > 0 && !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
