use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("engine connection error: {0}")]
    Upstream(String),

    #[error("engine handshake failed: {0}")]
    Handshake(String),

    #[error("hub is gone")]
    HubClosed,

    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
