use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create sandbox {id}: {reason}")]
    CreateFailed { id: String, reason: String },

    #[error("sandbox {id} not found")]
    NotFound { id: String },

    #[error("exec failed in sandbox {id}: {reason}")]
    ExecFailed { id: String, reason: String },

    #[error("sandbox operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("sandbox {id} has no address yet")]
    NoAddress { id: String },

    #[error("sandbox runtime error: {0}")]
    Runtime(String),

    #[error("workspace IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SandboxError> = std::result::Result<T, E>;
