use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("no sandbox is running")]
    NoSandbox,

    #[error("sandbox error: {0}")]
    Sandbox(#[from] drover_sandbox::SandboxError),

    #[error("gateway did not become healthy within {seconds}s")]
    GatewayTimeout { seconds: u64 },

    #[error("gateway unreachable: {0}")]
    GatewayUnreachable(String),

    #[error("workspace IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("invalid bind address {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        let status = match &self {
            WorkerError::Unauthorized => StatusCode::UNAUTHORIZED,
            WorkerError::NoSandbox => StatusCode::CONFLICT,
            WorkerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WorkerError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            WorkerError::GatewayUnreachable(_) => StatusCode::BAD_GATEWAY,
            WorkerError::Sandbox(_) | WorkerError::Io(_) | WorkerError::Bind { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type Result<T, E = WorkerError> = std::result::Result<T, E>;
