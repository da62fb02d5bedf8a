//! In-sandbox gateway: one persistent LLM-engine session, many clients.
//!
//! The gateway owns the only upstream session to the engine and fans its
//! events out to any number of downstream WebSocket clients (the
//! supervisor plus humans), replaying a bounded history ring to each new
//! connection. HTTP side channels expose health, one-shot message
//! delivery, and supervisor control on the same port.

pub mod engine;
mod error;
mod history;
mod hub;
mod http;
mod upstream;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::info;

use drover_core::GatewayConfig;

pub use error::{GatewayError, Result};
pub use history::EventRing;
pub use hub::{Hub, HubCommand, HubHandle, HubSnapshot};
pub use http::{instance_info_from_env, router, HttpState};
pub use upstream::{UpstreamConfig, UpstreamSession};

/// Everything needed to run one gateway process
pub struct GatewayRuntime {
    pub project: String,
    pub config: GatewayConfig,
    pub workspace: PathBuf,
    /// Engine auth material; password preferred, token accepted
    pub engine_password: Option<String>,
    pub engine_token: Option<String>,
}

impl GatewayRuntime {
    /// Run the hub, the upstream session, and the HTTP server until the
    /// shutdown future completes.
    pub async fn run(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
        let (hub, handle) = Hub::new(
            self.config.history_capacity,
            upstream_tx,
            Some(self.workspace.clone()),
        );
        tokio::spawn(hub.run());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = shutdown_tx.send(true);
        });

        let session = UpstreamSession::new(
            UpstreamConfig {
                url: format!("ws://127.0.0.1:{}/", self.config.engine_port),
                session_key: self.config.session_key(&self.project),
                password: self.engine_password,
                token: self.engine_token,
                reconnect_initial: Duration::from_secs(self.config.reconnect_initial_secs),
                reconnect_max: Duration::from_secs(self.config.reconnect_max_secs),
            },
            handle.clone(),
            upstream_rx,
            shutdown_rx.clone(),
        );
        tokio::spawn(session.run());

        let state = HttpState::new(handle, instance_info_from_env());
        let app = router(state);

        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Bind {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        info!(
            bind = %addr,
            project = %self.project,
            engine_port = self.config.engine_port,
            "gateway listening"
        );

        let mut server_shutdown = shutdown_rx;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|&stop| stop).await;
            })
            .await
            .map_err(GatewayError::Io)?;

        info!("gateway shut down");
        Ok(())
    }
}
