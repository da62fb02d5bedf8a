//! Logging initialization shared by all daemons

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{CoreError, Result};

/// Initialize the global tracing subscriber from [`LoggingConfig`].
///
/// `RUST_LOG` overrides the configured level when set. Calling this twice
/// returns an error from the subscriber registry, which is surfaced as a
/// fatal init error.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let result = match (&config.file, config.format.as_str()) {
        (Some(path), format) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| CoreError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            let writer = Arc::new(file);
            if format == "pretty" {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .try_init()
            } else {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .try_init()
            }
        }
        (None, "pretty") => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init(),
        (None, _) => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
    };

    result.map_err(|e| CoreError::fatal(format!("failed to init logging: {e}")))
}
