//! drover in-sandbox gateway daemon

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use drover_core::{config::DroverConfig, logging, WORKSPACE_PATH};
use drover_gateway::GatewayRuntime;

#[derive(Parser)]
#[command(name = "drover-gatewayd", about = "Drover gateway", version)]
struct Cli {
    /// Project this sandbox belongs to
    #[arg(long, env = "PROJECT_NAME")]
    project: String,

    /// Gateway listen port override
    #[arg(long, env = "DROVER_GATEWAY_PORT")]
    port: Option<u16>,

    /// Upstream engine port override
    #[arg(long, env = "DROVER_ENGINE_PORT")]
    engine_port: Option<u16>,

    /// Engine password (preferred auth)
    #[arg(long, env = "DROVER_ENGINE_PASSWORD", hide_env_values = true)]
    engine_password: Option<String>,

    /// Engine token (accepted when no password is set)
    #[arg(long, env = "DROVER_ENGINE_TOKEN", hide_env_values = true)]
    engine_token: Option<String>,

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
    logging::init(&config.logging)?;

    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(port) = cli.engine_port {
        config.gateway.engine_port = port;
    }

    // the LLM credential doubles as the engine token when nothing more
    // specific is configured
    let engine_token = cli
        .engine_token
        .or_else(|| std::env::var("LLM_API_KEY").ok());

    info!(project = %cli.project, "starting gateway");
    GatewayRuntime {
        project: cli.project,
        config: config.gateway,
        workspace: cli.workspace,
        engine_password: cli.engine_password,
        engine_token,
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
