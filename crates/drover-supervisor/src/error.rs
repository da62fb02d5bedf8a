use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("gateway connection error: {0}")]
    Gateway(String),

    #[error("task document error: {0}")]
    TaskDoc(String),

    #[error("verify command failed to run: {0}")]
    Verify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;
