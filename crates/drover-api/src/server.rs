//! Control-plane API server

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use crate::error::{ApiError, Result};
use crate::router::build_router;
use crate::state::ApiState;

pub struct ApiServer {
    bind: String,
}

impl ApiServer {
    pub fn new(bind: impl Into<String>) -> Self {
        Self { bind: bind.into() }
    }

    /// Serve until the shutdown future completes.
    pub async fn run(
        self,
        state: ApiState,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr: SocketAddr = self
            .bind
            .parse()
            .map_err(|e| ApiError::Internal(format!("invalid bind address {}: {e}", self.bind)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to bind {addr}: {e}")))?;

        info!(bind = %addr, "control API listening");

        axum::serve(listener, build_router(state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        info!("control API shut down");
        Ok(())
    }
}
