//! Task endpoints: create/replace the workspace task document and drive
//! its transitions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use drover_spec::{Task, TaskContext, TaskGoal, TaskLimits, TaskStatus, TaskType};

use crate::error::{ApiError, Result};
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub goal: TaskGoal,
    #[serde(default)]
    pub limits: TaskLimits,
    #[serde(default)]
    pub context: TaskContext,
}

pub async fn put_task(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>)> {
    state.store.get_project(&name)?;

    let mut task = Task::new(request.name, request.description);
    task.task_type = request.task_type;
    task.goal = request.goal;
    task.limits = request.limits;
    task.context = request.context;

    state.manager.write_task(&name, &task).await?;
    info!(project = %name, task = %task.id, "task installed");
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn stop_task(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Task>> {
    state.store.get_project(&name)?;
    let mut task = load_task(&state, &name).await?;
    if task.status == TaskStatus::Running {
        task.stop("operator");
        state.manager.write_task(&name, &task).await?;
    }
    Ok(Json(task))
}

pub async fn resume_task(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Task>> {
    state.store.get_project(&name)?;
    let mut task = load_task(&state, &name).await?;
    if task.status.is_terminal() {
        task.resume();
        state.manager.write_task(&name, &task).await?;
        info!(project = %name, task = %task.id, "task resumed");
    }
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub question_id: String,
    pub answer: String,
}

pub async fn respond_task(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<RespondRequest>,
) -> Result<Json<Task>> {
    state.store.get_project(&name)?;
    let mut task = load_task(&state, &name).await?;

    let question = task
        .find_question_mut(&request.question_id)
        .ok_or_else(|| ApiError::NotFound(format!("question {:?}", request.question_id)))?;
    question.record_answer(request.answer);

    state.manager.write_task(&name, &task).await?;
    info!(project = %name, question = %request.question_id, "question answered");
    Ok(Json(task))
}

async fn load_task(state: &ApiState, name: &str) -> Result<Task> {
    state
        .manager
        .read_task(name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task for project {name:?}")))
}
