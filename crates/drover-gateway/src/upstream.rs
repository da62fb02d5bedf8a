//! The single persistent session to the LLM engine.
//!
//! Exactly one upstream WebSocket exists per gateway process. The task
//! performs the challenge/connect handshake, forwards chat sends on the
//! fixed session key with fresh idempotency nonces, normalizes engine chat
//! events for the hub, and reconnects with exponential backoff when the
//! socket drops. Socket loss is silent to downstream clients; only the
//! handshake state is reported.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use drover_spec::Event;

use crate::engine::{
    normalize, AuthMaterial, ClientIdent, EngineClientFrame, EngineServerFrame, ProtocolRange,
    PROTOCOL_MAX, PROTOCOL_MIN,
};
use crate::error::{GatewayError, Result};
use crate::hub::{HubCommand, HubHandle};

/// Handshake must complete within this window
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream session parameters
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Engine WebSocket URL, e.g. `ws://127.0.0.1:4020/`
    pub url: String,
    /// Fixed session key for the project's conversation
    pub session_key: String,
    /// Password is preferred; token accepted
    pub password: Option<String>,
    pub token: Option<String>,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

/// The upstream session task
pub struct UpstreamSession {
    config: UpstreamConfig,
    hub: HubHandle,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    shutdown: watch::Receiver<bool>,
}

impl UpstreamSession {
    pub fn new(
        config: UpstreamConfig,
        hub: HubHandle,
        outbound_rx: mpsc::UnboundedReceiver<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            hub,
            outbound_rx,
            shutdown,
        }
    }

    /// Run with automatic reconnection until shutdown.
    pub async fn run(mut self) {
        let mut backoff = self.config.reconnect_initial;
        loop {
            if *self.shutdown.borrow() {
                return;
            }

            match self.run_once(&mut backoff).await {
                Ok(()) => {
                    info!("upstream session shut down");
                    return;
                }
                Err(e) => {
                    debug!(error = %e, "engine session ended, will reconnect");
                }
            }

            self.hub.send(HubCommand::UpstreamConnected(false));

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return;
                    }
                }
            }
            backoff = std::cmp::min(backoff.saturating_mul(2), self.config.reconnect_max);
        }
    }

    /// One connection attempt: handshake, then the message loop.
    /// Returns Ok on requested shutdown, Err on any connection failure.
    async fn run_once(&mut self, backoff: &mut Duration) -> Result<()> {
        debug!(url = %self.config.url, "connecting to engine");

        let (ws, _response) = connect_async(&self.config.url)
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // 1. the engine opens with connect.challenge
        wait_for_frame(&mut stream, |frame| {
            matches!(frame, EngineServerFrame::ConnectChallenge { .. })
        })
        .await?;

        // 2. answer with our identity, version range, and auth material
        let connect = EngineClientFrame::Connect {
            client: ClientIdent {
                name: "drover-gateway".to_string(),
                version: env!("CARGO_PKG_VERSION"),
            },
            role: "operator",
            protocol: ProtocolRange {
                min: PROTOCOL_MIN,
                max: PROTOCOL_MAX,
            },
            auth: AuthMaterial {
                password: self.config.password.clone(),
                token: if self.config.password.is_some() {
                    None
                } else {
                    self.config.token.clone()
                },
            },
        };
        send_frame(&mut sink, &connect).await?;

        // 3. connect.ok completes the handshake
        let ok = wait_for_frame(&mut stream, |frame| {
            matches!(
                frame,
                EngineServerFrame::ConnectOk { .. } | EngineServerFrame::Error { .. }
            )
        })
        .await?;
        if let EngineServerFrame::Error { message, .. } = ok {
            return Err(GatewayError::Handshake(message));
        }

        info!(session = %self.config.session_key, "engine session established");
        self.hub.send(HubCommand::UpstreamConnected(true));
        // the attempt counter resets on successful handshake
        *backoff = self.config.reconnect_initial;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return Ok(());
                    }
                }

                outbound = self.outbound_rx.recv() => {
                    let Some(message) = outbound else {
                        return Ok(());
                    };
                    let frame = EngineClientFrame::ChatSend {
                        session: self.config.session_key.clone(),
                        message,
                        nonce: Uuid::new_v4().to_string(),
                    };
                    send_frame(&mut sink, &frame).await?;
                }

                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.handle_engine_frame(text.as_str());
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            sink.send(WsMessage::Pong(payload))
                                .await
                                .map_err(|e| GatewayError::Upstream(e.to_string()))?;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "engine closed connection".to_string());
                            return Err(GatewayError::Upstream(reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(GatewayError::Upstream(e.to_string()));
                        }
                        None => {
                            return Err(GatewayError::Upstream("engine stream ended".to_string()));
                        }
                    }
                }
            }
        }
    }

    fn handle_engine_frame(&self, raw: &str) {
        let frame: EngineServerFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "unknown engine frame dropped");
                return;
            }
        };

        match frame {
            EngineServerFrame::ChatAck { nonce } => {
                debug!(nonce = %nonce, "chat send acknowledged");
                self.hub.send(HubCommand::UpstreamBusy(true));
            }
            EngineServerFrame::ChatEvent { session, event } => {
                if session != self.config.session_key {
                    debug!(session = %session, "chat event for foreign session dropped");
                    return;
                }
                let events = normalize(event);
                if !events.is_empty() {
                    self.hub.send(HubCommand::UpstreamEvents(events));
                }
            }
            EngineServerFrame::Error { message, code } => {
                warn!(message = %message, "engine reported error");
                self.hub
                    .send(HubCommand::UpstreamEvents(vec![Event::Error {
                        message,
                        code,
                    }]));
            }
            EngineServerFrame::ConnectChallenge { .. } | EngineServerFrame::ConnectOk { .. } => {
                debug!("unexpected handshake frame mid-session, dropped");
            }
        }
    }
}

/// Read frames until one matches, dropping everything else with a debug
/// log. Bounded by the handshake timeout.
async fn wait_for_frame<S>(
    stream: &mut S,
    accept: impl Fn(&EngineServerFrame) -> bool,
) -> Result<EngineServerFrame>
where
    S: StreamExt<
            Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
        > + Unpin,
{
    timeout(HANDSHAKE_TIMEOUT, async {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    match serde_json::from_str::<EngineServerFrame>(text.as_str()) {
                        Ok(frame) if accept(&frame) => return Ok(frame),
                        Ok(frame) => debug!(frame = ?frame, "frame ignored during handshake"),
                        Err(e) => debug!(error = %e, "unknown frame during handshake"),
                    }
                }
                Ok(WsMessage::Close(_)) => {
                    return Err(GatewayError::Handshake(
                        "engine closed during handshake".to_string(),
                    ));
                }
                Ok(_) => {}
                Err(e) => return Err(GatewayError::Upstream(e.to_string())),
            }
        }
        Err(GatewayError::Handshake(
            "engine stream ended during handshake".to_string(),
        ))
    })
    .await
    .map_err(|_| GatewayError::Handshake("handshake timed out".to_string()))?
}

async fn send_frame<S>(sink: &mut S, frame: &EngineClientFrame) -> Result<()>
where
    S: SinkExt<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let json =
        serde_json::to_string(frame).map_err(|e| GatewayError::Upstream(e.to_string()))?;
    sink.send(WsMessage::Text(json.into()))
        .await
        .map_err(|e| GatewayError::Upstream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn wait_until<F, Fut>(check: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    /// Fake engine: one accept, scripted handshake, then chat flow.
    async fn spawn_engine(listener: TcpListener, session_key: String) {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let (mut sink, mut stream) = ws.split();

        sink.send(WsMessage::Text(
            r#"{"type":"connect.challenge","challenge":"c1"}"#.into(),
        ))
        .await
        .unwrap();

        // expect connect
        let connect = loop {
            match stream.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => break text.to_string(),
                _ => continue,
            }
        };
        assert!(connect.contains("\"type\":\"connect\""));
        assert!(connect.contains("\"role\":\"operator\""));

        sink.send(WsMessage::Text(r#"{"type":"connect.ok","protocol":3}"#.into()))
            .await
            .unwrap();

        // expect one chat.send, then script a full turn
        let send = loop {
            match stream.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => break text.to_string(),
                _ => continue,
            }
        };
        let parsed: serde_json::Value = serde_json::from_str(&send).unwrap();
        assert_eq!(parsed["type"], "chat.send");
        assert_eq!(parsed["session"], session_key.as_str());
        let nonce = parsed["nonce"].as_str().unwrap();
        assert!(!nonce.is_empty());

        let ack = format!(r#"{{"type":"chat.ack","nonce":"{nonce}"}}"#);
        sink.send(WsMessage::Text(ack.into())).await.unwrap();

        // leave the busy window observable before terminating the turn
        tokio::time::sleep(Duration::from_millis(300)).await;

        let event = format!(
            r#"{{"type":"chat.event","session":"{session_key}","event":{{"kind":"delta","text":"thinking"}}}}"#
        );
        sink.send(WsMessage::Text(event.into())).await.unwrap();

        let fin = format!(
            r#"{{"type":"chat.event","session":"{session_key}","event":{{"kind":"final"}}}}"#
        );
        sink.send(WsMessage::Text(fin.into())).await.unwrap();

        // hold the socket open
        while stream.next().await.is_some() {}
    }

    #[tokio::test]
    async fn handshake_chat_and_busy_flow() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let session_key = "main:webchat:drover-demo".to_string();
        tokio::spawn(spawn_engine(listener, session_key.clone()));

        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
        let (hub, handle) = Hub::new(50, upstream_tx.clone(), None);
        tokio::spawn(hub.run());

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = UpstreamSession::new(
            UpstreamConfig {
                url: format!("ws://{addr}/"),
                session_key,
                password: Some("pw".to_string()),
                token: None,
                reconnect_initial: Duration::from_millis(50),
                reconnect_max: Duration::from_millis(200),
            },
            handle.clone(),
            upstream_rx,
            shutdown_rx,
        );
        tokio::spawn(session.run());

        // handshake completion is what ocConnected reflects
        wait_until(|| async { handle.snapshot().await.unwrap().oc_connected }).await;

        // a forwarded message gets acked -> busy, then final -> not busy
        upstream_tx.send("get to work".to_string()).unwrap();
        wait_until(|| async { handle.snapshot().await.unwrap().agent_busy }).await;
        wait_until(|| async { !handle.snapshot().await.unwrap().agent_busy }).await;
    }

    #[tokio::test]
    async fn unreachable_engine_reports_disconnected() {
        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
        let (hub, handle) = Hub::new(50, upstream_tx, None);
        tokio::spawn(hub.run());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = UpstreamSession::new(
            UpstreamConfig {
                url: "ws://127.0.0.1:1/".to_string(),
                session_key: "main:webchat:drover-demo".to_string(),
                password: None,
                token: Some("tok".to_string()),
                reconnect_initial: Duration::from_millis(20),
                reconnect_max: Duration::from_millis(40),
            },
            handle.clone(),
            upstream_rx,
            shutdown_rx,
        );
        let task = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.snapshot().await.unwrap().oc_connected);

        shutdown_tx.send(true).unwrap();
        let _ = timeout(Duration::from_secs(2), task).await;
    }
}
