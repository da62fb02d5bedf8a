//! API error taxonomy and HTTP mapping.
//!
//! Every response body is a single-sentence message; stack detail,
//! ciphertext, and plaintext secrets never leave the process.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use drover_fleet::FleetError;
use drover_secrets::SecretsError;
use drover_spec::ValidationError;
use drover_store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    /// Decryption failure. Fatal for the value; the ciphertext is never
    /// surfaced.
    #[error("stored secret failed its integrity check")]
    Integrity,

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Integrity | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // log the detail, return only the sentence
            if let ApiError::Internal(detail) = &self {
                tracing::error!(detail = %detail, "internal error");
            }
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => ApiError::NotFound(format!("{entity} {id:?}")),
            StoreError::Conflict { entity, id } => ApiError::Conflict(format!("{entity} {id:?}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SecretsError> for ApiError {
    fn from(err: SecretsError) -> Self {
        match err {
            SecretsError::Integrity => ApiError::Integrity,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::Store(inner) => inner.into(),
            FleetError::Secrets(inner) => inner.into(),
            FleetError::GatewayTimeout { .. } => ApiError::Timeout(err_to_sentence(&err)),
            FleetError::Timeout { .. } => ApiError::Timeout(err_to_sentence(&err)),
            FleetError::Worker(_) | FleetError::Cloud(_) | FleetError::WorkerNotReady { .. } => {
                ApiError::Upstream(err_to_sentence(&err))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

fn err_to_sentence(err: &FleetError) -> String {
    err.to_string()
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(
            ApiError::Validation("bad name".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::NotFound("project \"x\"".to_string()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("project \"x\"".to_string()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::Integrity.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn integrity_message_leaks_nothing() {
        let err: ApiError = SecretsError::Integrity.into();
        assert_eq!(err.to_string(), "stored secret failed its integrity check");
    }

    #[test]
    fn store_errors_map() {
        let err: ApiError = StoreError::NotFound {
            entity: "project",
            id: "demo".to_string(),
        }
        .into();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err: ApiError = StoreError::Conflict {
            entity: "project",
            id: "demo".to_string(),
        }
        .into();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
