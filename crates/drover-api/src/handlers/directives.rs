//! Operator directive CRUD. Directives are re-injected into every
//! supervisor prompt until removed.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use drover_spec::Directive;

use crate::error::{ApiError, Result};
use crate::state::ApiState;

pub async fn list_directives(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Directive>>> {
    state.store.get_project(&name)?;
    Ok(Json(state.manager.read_directives(&name).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddDirectiveRequest {
    pub text: String,
}

pub async fn add_directive(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<AddDirectiveRequest>,
) -> Result<(StatusCode, Json<Directive>)> {
    if request.text.trim().is_empty() {
        return Err(ApiError::Validation(
            "directive text must not be empty".to_string(),
        ));
    }
    state.store.get_project(&name)?;

    let mut directives = state.manager.read_directives(&name).await?;
    let directive = Directive::new(request.text.trim());
    directives.push(directive.clone());
    state.manager.write_directives(&name, &directives).await?;
    Ok((StatusCode::CREATED, Json(directive)))
}

pub async fn delete_directive(
    State(state): State<ApiState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.store.get_project(&name)?;

    let mut directives = state.manager.read_directives(&name).await?;
    let before = directives.len();
    directives.retain(|d| d.id != id);
    if directives.len() == before {
        return Err(ApiError::NotFound(format!("directive {id:?}")));
    }
    state.manager.write_directives(&name, &directives).await?;
    Ok(StatusCode::NO_CONTENT)
}
