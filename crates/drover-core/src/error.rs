//! Core error types shared across the drover workspace

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by core configuration and startup plumbing
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A required piece of process state was missing at startup.
    /// The process must abort; there is no local recovery.
    #[error("fatal init error: {0}")]
    FatalInit(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),

    #[error("invalid configuration for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("failed to load config from {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },
}

/// Result alias for core operations
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

impl CoreError {
    /// A fatal startup error (missing master secret, unusable store path)
    pub fn fatal(msg: impl Into<String>) -> Self {
        CoreError::FatalInit(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_init_display() {
        let err = CoreError::fatal("master secret not set");
        assert!(err.to_string().contains("master secret"));
    }
}
