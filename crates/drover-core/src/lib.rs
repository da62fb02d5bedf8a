//! Core configuration and error types for drover
//!
//! Every daemon loads its section of [`config::DroverConfig`] from a TOML
//! file plus environment overrides, and initializes logging through
//! [`logging::init`].

pub mod config;
mod error;
pub mod logging;

pub use config::{
    ControlConfig, DiskSizeRule, DroverConfig, FleetConfig, GatewayConfig, LoggingConfig,
    SupervisorTimings, WorkerConfig,
};
pub use error::{ConfigError, CoreError, Result};

/// Environment variable carrying the SecretBox master secret.
/// Absence at control-plane startup is a fatal error.
pub const MASTER_SECRET_ENV: &str = "DROVER_MASTER_SECRET";

/// Environment variable seeding the first operator token (hashed once).
pub const OPERATOR_TOKEN_ENV: &str = "DROVER_OPERATOR_TOKEN";

/// Environment variable naming the project inside a sandbox.
pub const PROJECT_NAME_ENV: &str = "PROJECT_NAME";

/// Fixed workspace mount point inside the sandbox.
pub const WORKSPACE_PATH: &str = "/workspace";
