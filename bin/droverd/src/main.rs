//! drover control-plane daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use drover_api::{ApiServer, ApiState};
use drover_core::{config::DroverConfig, logging, MASTER_SECRET_ENV, OPERATOR_TOKEN_ENV};
use drover_fleet::{ContainerManager, DockerSandboxFactory, HttpWorkerProbe, MockCloud, WorkerProvisioner};
use drover_secrets::SecretBox;
use drover_store::Store;

#[derive(Parser)]
#[command(name = "droverd", about = "Drover control plane", version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "/etc/drover/drover.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control-plane API
    Serve,
    /// Hash an operator token and insert it into the token table
    SeedToken {
        #[arg(long)]
        token: String,
        #[arg(long)]
        label: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DroverConfig::load_or_default(&cli.config)?;
    logging::init(&config.logging)?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::SeedToken { token, label } => seed_token(&config, &token, label.as_deref()),
    }
}

async fn serve(config: DroverConfig) -> anyhow::Result<()> {
    let master_secret = std::env::var(MASTER_SECRET_ENV)
        .with_context(|| format!("{MASTER_SECRET_ENV} must be set"))?;
    let secrets = SecretBox::from_master_secret(&master_secret)?;

    if let Some(parent) = config.control.store_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(Store::open(&config.control.store_path)?);

    // the first operator token can come from the environment, once
    let seed = std::env::var(OPERATOR_TOKEN_ENV).ok();
    drover_api::seed_operator_token(&store, seed.as_deref())?;

    // real cloud drivers plug in from outside; without one, worker
    // provisioning runs against the mock provider
    warn!("no cloud driver configured; worker provisioning uses the mock provider");
    let cloud = Arc::new(MockCloud::new());

    let control_url = format!("http://{}", config.control.bind);
    let provisioner = Arc::new(WorkerProvisioner::new(
        cloud,
        store.clone(),
        config.fleet.clone(),
        control_url,
    ));

    let manager = Arc::new(ContainerManager::new(
        store.clone(),
        secrets.clone(),
        config.fleet.clone(),
        config.control.clone(),
        Arc::new(DockerSandboxFactory::new(
            config.control.workspace_root.clone(),
        )),
        config.control.workspace_root.clone(),
        config.gateway.port,
        Arc::new(HttpWorkerProbe::new()),
    ));

    let state = ApiState {
        store,
        secrets,
        manager,
        provisioner,
    };

    info!(bind = %config.control.bind, "starting control plane");
    ApiServer::new(config.control.bind.clone())
        .run(state, shutdown_signal())
        .await?;
    Ok(())
}

fn seed_token(config: &DroverConfig, token: &str, label: Option<&str>) -> anyhow::Result<()> {
    if let Some(parent) = config.control.store_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Store::open(&config.control.store_path)?;
    store.insert_token(&drover_api::hash_token(token), label.or(Some("cli")))?;
    println!("token seeded");
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
