//! Project secret endpoints. Values are encrypted before they touch the
//! store and are never listed back.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use drover_spec::validate::validate_secret_key;

use crate::error::Result;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct PutSecretRequest {
    pub key: String,
    pub value: String,
}

pub async fn put_secret(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<PutSecretRequest>,
) -> Result<StatusCode> {
    let key = validate_secret_key(&request.key)?;
    state.store.get_project(&name)?;

    let envelope = state.secrets.encrypt(&request.value)?;
    state.store.upsert_secret(&name, key.as_str(), &envelope)?;
    info!(project = %name, key = %key, "secret stored");
    Ok(StatusCode::CREATED)
}

pub async fn list_secrets(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.store.get_project(&name)?;
    let keys = state.store.list_secret_keys(&name)?;
    Ok(Json(serde_json::json!({ "keys": keys })))
}

pub async fn delete_secret(
    State(state): State<ApiState>,
    Path((name, key)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.store.get_project(&name)?;
    state.store.delete_secret(&name, &key)?;
    Ok(StatusCode::NO_CONTENT)
}
