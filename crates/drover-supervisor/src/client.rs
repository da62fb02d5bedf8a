//! WebSocket client to the local gateway.
//!
//! Maintains the connection (identifying as `supervisor` on every
//! connect), forwards server frames to the runner, and carries outbound
//! user messages. The gateway is the runner's only source of truth for
//! engine and presence state, so reconnects just re-identify and let the
//! replayed status frame resynchronize it.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

use drover_spec::{ClientFrame, ClientRole, ServerFrame};

const RECONNECT_INITIAL: Duration = Duration::from_secs(2);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Run the client until shutdown. Frames flow out through `frames_tx`;
/// user messages flow in through `outbound_rx`.
pub async fn run(
    url: String,
    frames_tx: mpsc::UnboundedSender<ServerFrame>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = RECONNECT_INITIAL;
    loop {
        if *shutdown.borrow() {
            return;
        }

        match connection(&url, &frames_tx, &mut outbound_rx, &mut shutdown).await {
            Ok(()) => return,
            Err(e) => debug!(error = %e, "gateway connection lost, reconnecting"),
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
        backoff = std::cmp::min(backoff.saturating_mul(2), RECONNECT_MAX);
    }
}

async fn connection(
    url: &str,
    frames_tx: &mpsc::UnboundedSender<ServerFrame>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), String> {
    let (ws, _) = connect_async(url).await.map_err(|e| e.to_string())?;
    let (mut sink, mut stream) = ws.split();

    let identify = serde_json::to_string(&ClientFrame::Identify {
        role: ClientRole::Supervisor,
    })
    .map_err(|e| e.to_string())?;
    sink.send(WsMessage::Text(identify.into()))
        .await
        .map_err(|e| e.to_string())?;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
            }

            outbound = outbound_rx.recv() => {
                let Some(content) = outbound else {
                    return Ok(());
                };
                let frame = serde_json::to_string(&ClientFrame::UserMessage { content })
                    .map_err(|e| e.to_string())?;
                sink.send(WsMessage::Text(frame.into()))
                    .await
                    .map_err(|e| e.to_string())?;
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerFrame>(text.as_str()) {
                            Ok(frame) => {
                                if frames_tx.send(frame).is_err() {
                                    return Ok(());
                                }
                            }
                            Err(e) => debug!(error = %e, "unknown gateway frame dropped"),
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if sink.send(WsMessage::Pong(payload)).await.is_err() {
                            return Err("pong failed".to_string());
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Err("gateway closed the connection".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "gateway socket error");
                        return Err(e.to_string());
                    }
                }
            }
        }
    }
}
