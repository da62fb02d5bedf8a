//! Periodic heartbeat to the control plane

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::server::WorkerState;

/// POST a heartbeat at the configured cadence until shutdown. The first
/// beat waits out the initial delay so the agent can finish binding.
pub async fn run(
    state: WorkerState,
    control_url: String,
    interval: Duration,
    initial_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = format!("{}/api/workers/{}/heartbeat", control_url, state.project);
    info!(url = %url, interval_secs = interval.as_secs(), "heartbeat task starting");

    tokio::select! {
        _ = tokio::time::sleep(initial_delay) => {}
        _ = shutdown.changed() => return,
    }

    loop {
        beat(&state, &url).await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn beat(state: &WorkerState, url: &str) {
    let container_running = state.sandbox.health().await.unwrap_or(false);
    let result = state
        .http
        .post(url)
        .bearer_auth(&state.token)
        .timeout(Duration::from_secs(10))
        .json(&serde_json::json!({ "container_running": container_running }))
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            debug!("heartbeat delivered");
        }
        Ok(response) => {
            debug!(status = %response.status(), "heartbeat rejected");
        }
        Err(e) => {
            debug!(error = %e, "heartbeat failed");
        }
    }
}
