//! Autonomous supervisor for one sandboxed agent.
//!
//! Connects to the local gateway as the singleton `supervisor` client and
//! keeps the agent productively engaged between human interactions: it
//! drives turns, classifies their productivity, backs off on empty
//! output, escalates recovery, enforces task limits, and surfaces
//! operator answers. Only SIGTERM or an explicit stop control exits the
//! process; any other failure restarts the loop after a pause.

mod client;
mod error;
pub mod memory;
pub mod metrics;
pub mod procinfo;
pub mod prompt;
mod runner;
pub mod taskdoc;

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use drover_core::SupervisorTimings;

pub use error::{Result, SupervisorError};
pub use metrics::{classify, escalation, next_delay, PromptKind, TurnClass, TurnMetrics};
pub use runner::{Outcome, Supervisor};
pub use taskdoc::{TaskEnforcer, TaskStore, TaskVerdict};

/// Everything needed to run one supervisor process
pub struct SupervisorRuntime {
    pub project: String,
    pub workspace: PathBuf,
    pub gateway_url: String,
    pub timings: SupervisorTimings,
}

impl SupervisorRuntime {
    /// Run until stop/restart. An unhandled loop error schedules a
    /// restart of the main loop after the configured pause; the process
    /// itself stays up.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Outcome {
        loop {
            // fresh channels and gateway client per attempt; a dropped
            // receiver winds the previous client task down
            let (frames_tx, frames_rx) = mpsc::unbounded_channel();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

            tokio::spawn(client::run(
                self.gateway_url.clone(),
                frames_tx,
                outbound_rx,
                shutdown.clone(),
            ));

            let supervisor = Supervisor::new(
                self.project.clone(),
                self.workspace.clone(),
                self.timings.clone(),
                frames_rx,
                outbound_tx,
                shutdown.clone(),
            );

            match supervisor.run().await {
                Ok(outcome) => {
                    info!(outcome = ?outcome, "supervisor loop finished");
                    return outcome;
                }
                Err(e) => {
                    error!(error = %e, "supervisor loop crashed, restarting");
                    tokio::time::sleep(Duration::from_secs(self.timings.loop_restart_secs)).await;
                    if *shutdown.borrow() {
                        return Outcome::Stop;
                    }
                }
            }
        }
    }
}
