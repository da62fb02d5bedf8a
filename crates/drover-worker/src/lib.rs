//! Worker agent: the per-instance server that owns one project's sandbox
//! and bridges control plane <-> sandbox <-> gateway.

mod auth;
mod error;
mod heartbeat;
mod host;
mod relay;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use drover_core::{FleetConfig, WorkerConfig};
use drover_sandbox::Sandbox;

pub use error::{Result, WorkerError};
pub use host::{clamp, HostCapability};
pub use server::{router, WorkerState};

/// Everything needed to run one worker agent
pub struct WorkerRuntime {
    pub project: String,
    pub worker_token: String,
    pub sandbox: Arc<dyn Sandbox>,
    pub workspace: std::path::PathBuf,
    pub config: WorkerConfig,
    pub fleet: FleetConfig,
    pub gateway_port: u16,
}

impl WorkerRuntime {
    /// Serve the HTTP surface and heartbeat until the shutdown future
    /// completes.
    pub async fn run(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let state = WorkerState {
            project: self.project.clone(),
            token: self.worker_token,
            sandbox: self.sandbox,
            workspace: self.workspace,
            gateway_port: self.gateway_port,
            gateway_wait: Duration::from_secs(self.fleet.gateway_wait_secs),
            gateway_wait_interval: Duration::from_secs(self.fleet.gateway_wait_interval_secs),
            http: reqwest::Client::new(),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = shutdown_tx.send(true);
        });

        tokio::spawn(heartbeat::run(
            state.clone(),
            self.config.control_url.clone(),
            Duration::from_secs(self.config.heartbeat_interval_secs),
            Duration::from_secs(self.config.heartbeat_initial_delay_secs),
            shutdown_rx.clone(),
        ));

        let addr: SocketAddr = self.config.bind.parse().map_err(|e| WorkerError::Bind {
            addr: self.config.bind.clone(),
            reason: format!("{e}"),
        })?;
        let listener = TcpListener::bind(addr).await?;
        info!(bind = %addr, project = %self.project, "worker agent listening");

        let mut server_shutdown = shutdown_rx;
        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|&stop| stop).await;
            })
            .await?;

        info!("worker agent shut down");
        Ok(())
    }
}
