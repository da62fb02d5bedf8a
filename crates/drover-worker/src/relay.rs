//! WebSocket relay between the control plane and the in-sandbox gateway.
//!
//! Frames are forwarded opaquely in both directions; either side closing
//! closes the other. Also hosts the short-lived one-shot delivery used by
//! `POST /message`.

use axum::extract::ws::{CloseFrame, Message as AxMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TgCloseFrame;
use tokio_tungstenite::tungstenite::Message as TgMessage;
use tracing::debug;

use drover_spec::{ClientFrame, ClientRole};

use crate::error::WorkerError;
use crate::server::WorkerState;

/// `GET /gateway` upgrade: relay every frame to the sandbox gateway.
pub async fn gateway_ws(
    State(state): State<WorkerState>,
    upgrade: WebSocketUpgrade,
) -> Result<impl IntoResponse, WorkerError> {
    let url = state.gateway_ws_url().await?;
    Ok(upgrade.on_upgrade(move |socket| relay(socket, url)))
}

async fn relay(client: WebSocket, gateway_url: String) {
    let upstream = match connect_async(&gateway_url).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            debug!(error = %e, "gateway relay connect failed");
            let mut client = client;
            let _ = client
                .send(AxMessage::Close(Some(CloseFrame {
                    code: 1011,
                    reason: "gateway unreachable".into(),
                })))
                .await;
            return;
        }
    };

    let (mut up_sink, mut up_stream) = upstream.split();
    let (mut down_sink, mut down_stream) = client.split();

    loop {
        tokio::select! {
            from_client = down_stream.next() => {
                match from_client {
                    Some(Ok(message)) => {
                        let closing = matches!(message, AxMessage::Close(_));
                        if up_sink.send(to_tungstenite(message)).await.is_err() || closing {
                            break;
                        }
                    }
                    Some(Err(_)) | None => {
                        let _ = up_sink.send(TgMessage::Close(None)).await;
                        break;
                    }
                }
            }

            from_gateway = up_stream.next() => {
                match from_gateway {
                    Some(Ok(message)) => {
                        let closing = matches!(message, TgMessage::Close(_));
                        if down_sink.send(to_axum(message)).await.is_err() || closing {
                            break;
                        }
                    }
                    Some(Err(_)) | None => {
                        let _ = down_sink.send(AxMessage::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }
}

fn to_tungstenite(message: AxMessage) -> TgMessage {
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

fn to_axum(message: TgMessage) -> AxMessage {
    match message {
        TgMessage::Text(text) => AxMessage::Text(text.to_string().into()),
        TgMessage::Binary(data) => AxMessage::Binary(data.to_vec().into()),
        TgMessage::Ping(data) => AxMessage::Ping(data.to_vec().into()),
        TgMessage::Pong(data) => AxMessage::Pong(data.to_vec().into()),
        TgMessage::Close(frame) => AxMessage::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        })),
        // raw frames never surface from a client connection
        TgMessage::Frame(_) => AxMessage::Binary(Vec::new().into()),
    }
}

/// Open a short-lived connection, deliver exactly one user message, and
/// close. Returns whether the frame was handed to the gateway.
pub async fn deliver_one_message(gateway_ws_url: &str, content: &str) -> bool {
    let Ok((ws, _)) = connect_async(gateway_ws_url).await else {
        return false;
    };
    let (mut sink, _stream) = ws.split();

    let identify = match serde_json::to_string(&ClientFrame::Identify {
        role: ClientRole::Unknown,
    }) {
        Ok(json) => json,
        Err(_) => return false,
    };
    let message = match serde_json::to_string(&ClientFrame::UserMessage {
        content: content.to_string(),
    }) {
        Ok(json) => json,
        Err(_) => return false,
    };

    if sink.send(TgMessage::Text(identify.into())).await.is_err() {
        return false;
    }
    let delivered = sink.send(TgMessage::Text(message.into())).await.is_ok();
    let _ = sink.send(TgMessage::Close(None)).await;
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_conversion_preserves_code_and_reason() {
        let tg = to_tungstenite(AxMessage::Close(Some(CloseFrame {
            code: 4001,
            reason: "going away".into(),
        })));
        match tg {
            TgMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4001);
                assert_eq!(frame.reason.as_str(), "going away");
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn text_roundtrip() {
        let ax = to_axum(TgMessage::Text("payload".into()));
        match ax {
            AxMessage::Text(text) => assert_eq!(text.as_str(), "payload"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn binary_roundtrip() {
        let tg = to_tungstenite(AxMessage::Binary(vec![1u8, 2, 3].into()));
        match tg {
            TgMessage::Binary(data) => assert_eq!(data.as_ref(), &[1, 2, 3]),
            other => panic!("expected binary, got {other:?}"),
        }
    }
}
