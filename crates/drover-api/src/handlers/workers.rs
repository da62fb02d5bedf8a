//! Worker-facing endpoints. Heartbeats authenticate with the worker's own
//! token, not an operator token.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::{ApiError, Result};
use crate::state::ApiState;

pub async fn heartbeat(
    State(state): State<ApiState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    Json(_body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>> {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let worker = state
        .store
        .worker_for_project(&project)?
        .ok_or_else(|| ApiError::NotFound(format!("worker for project {project:?}")))?;

    let matches: bool = presented
        .as_bytes()
        .ct_eq(worker.worker_token.as_bytes())
        .into();
    if !matches {
        return Err(ApiError::Unauthorized);
    }

    state.store.touch_worker_heartbeat(&project)?;
    debug!(project = %project, worker = %worker.id, "heartbeat recorded");
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}
