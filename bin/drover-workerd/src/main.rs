//! drover worker-agent daemon
//!
//! Runs on a dedicated instance; configuration arrives through the
//! environment file the provisioner bakes into user-data.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use drover_core::{config::DroverConfig, logging};
use drover_sandbox::DockerSandbox;
use drover_worker::WorkerRuntime;

#[derive(Parser)]
#[command(name = "drover-workerd", about = "Drover worker agent", version)]
struct Cli {
    /// Project this instance hosts
    #[arg(long, env = "DROVER_PROJECT")]
    project: String,

    /// Token the control plane authenticates with
    #[arg(long, env = "DROVER_WORKER_TOKEN")]
    worker_token: String,

    /// Control-plane base URL for heartbeats
    #[arg(long, env = "DROVER_CONTROL_URL")]
    control_url: Option<String>,

    /// Listen port
    #[arg(long, env = "DROVER_WORKER_PORT")]
    port: Option<u16>,

    /// Root directory of project workspaces
    #[arg(long, env = "DROVER_WORKSPACE_ROOT", default_value = "/var/lib/drover/workspaces")]
    workspace_root: PathBuf,

    /// Configuration file
    #[arg(long, default_value = "/etc/drover/drover.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = DroverConfig::load_or_default(&cli.config)?;
    logging::init(&config.logging)?;

    if let Some(control_url) = cli.control_url {
        config.worker.control_url = control_url;
    }
    if let Some(port) = cli.port {
        config.worker.bind = format!("0.0.0.0:{port}");
    }

    let sandbox = DockerSandbox::connect(cli.project.clone(), cli.workspace_root.clone()).await?;
    let workspace = sandbox.workspace_dir();

    info!(project = %cli.project, "starting worker agent");
    WorkerRuntime {
        project: cli.project,
        worker_token: cli.worker_token,
        sandbox: Arc::new(sandbox),
        workspace,
        config: config.worker,
        fleet: config.fleet,
        gateway_port: config.gateway.port,
    }
    .run(shutdown_signal())
    .await?;
    Ok(())
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
