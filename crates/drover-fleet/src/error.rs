use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Store(#[from] drover_store::StoreError),

    #[error(transparent)]
    Secrets(#[from] drover_secrets::SecretsError),

    #[error(transparent)]
    Sandbox(#[from] drover_sandbox::SandboxError),

    #[error("cloud provider error: {0}")]
    Cloud(String),

    #[error("worker agent error: {0}")]
    Worker(String),

    #[error("project {project} has no ready worker")]
    WorkerNotReady { project: String },

    #[error("gateway for {project} did not become healthy within {seconds}s")]
    GatewayTimeout { project: String, seconds: u64 },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("workspace IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = FleetError> = std::result::Result<T, E>;
