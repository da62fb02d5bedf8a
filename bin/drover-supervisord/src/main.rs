//! drover in-sandbox supervisor daemon
//!
//! Exit code 0 means stop; exit code 3 asks the watchdog to respawn a
//! fresh supervisor.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use drover_core::{config::DroverConfig, logging, WORKSPACE_PATH};
use drover_supervisor::{Outcome, SupervisorRuntime};

/// Exit code that asks the watchdog to respawn
const RESTART_EXIT_CODE: i32 = 3;

#[derive(Parser)]
#[command(name = "drover-supervisord", about = "Drover supervisor", version)]
struct Cli {
    /// Project this sandbox belongs to
    #[arg(long, env = "PROJECT_NAME")]
    project: String,

    /// Local gateway port
    #[arg(long, env = "DROVER_GATEWAY_PORT")]
    gateway_port: Option<u16>,

    /// Workspace directory
    #[arg(long, env = "WORKSPACE", default_value = WORKSPACE_PATH)]
    workspace: PathBuf,

    /// Configuration file
    #[arg(long, default_value = "/etc/drover/drover.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = DroverConfig::load_or_default(&cli.config)?;

    // the supervisor log lives in the workspace so operators can tail it
    if config.logging.file.is_none() {
        config.logging.file = Some(cli.workspace.join(".supervisor.log"));
        config.logging.format = "pretty".to_string();
    }
    logging::init(&config.logging)?;

    let gateway_port = cli.gateway_port.unwrap_or(config.gateway.port);
    let gateway_url = format!("ws://127.0.0.1:{gateway_port}/ws");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!(project = %cli.project, gateway = %gateway_url, "starting supervisor");
    let outcome = SupervisorRuntime {
        project: cli.project,
        workspace: cli.workspace,
        gateway_url,
        timings: config.supervisor,
    }
    .run(shutdown_rx)
    .await;

    match outcome {
        Outcome::Stop => Ok(()),
        Outcome::Restart => std::process::exit(RESTART_EXIT_CODE),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
