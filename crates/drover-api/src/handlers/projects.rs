//! Project lifecycle endpoints

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use drover_spec::validate::{parse_supervisor_action, validate_project_name};
use drover_spec::{Project, ProjectStatus, Task, Worker, WorkerStatus};

use crate::error::{ApiError, Result};
use crate::state::ApiState;

/// Heartbeats older than this mark a worker as stale in listings
const HEARTBEAT_STALE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub extra_env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub instance_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub name: String,
    pub status: ProjectStatus,
    pub instance_type: Option<String>,
    pub worker_id: Option<String>,
    pub heartbeat_stale: bool,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub summary: ProjectSummary,
    pub mcp_servers: Vec<String>,
    pub task: Option<Task>,
    pub instance: Option<InstanceSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub id: String,
    pub instance_type: String,
    pub region: String,
    pub availability_zone: String,
    pub status: WorkerStatus,
    pub public_ip: Option<String>,
    pub last_heartbeat: Option<chrono::DateTime<Utc>>,
}

/// Synthesize the listed status: the worker's state wins whenever it is
/// not ready.
fn synthesized_status(project: &Project, worker: Option<&Worker>) -> ProjectStatus {
    match worker {
        Some(worker) if worker.status != WorkerStatus::Ready => match worker.status {
            WorkerStatus::Provisioning => ProjectStatus::Provisioning,
            WorkerStatus::Bootstrapping => ProjectStatus::Bootstrapping,
            WorkerStatus::Stopping => ProjectStatus::Resizing,
            WorkerStatus::Error => ProjectStatus::Error,
            WorkerStatus::Terminated | WorkerStatus::Ready => project.status,
        },
        _ => project.status,
    }
}

fn heartbeat_stale(worker: Option<&Worker>) -> bool {
    match worker.and_then(|w| w.last_heartbeat) {
        Some(beat) => Utc::now() - beat > ChronoDuration::seconds(HEARTBEAT_STALE_SECS),
        None => false,
    }
}

fn summarize(project: &Project, worker: Option<&Worker>) -> ProjectSummary {
    ProjectSummary {
        name: project.name.clone(),
        status: synthesized_status(project, worker),
        instance_type: project.instance_type.clone(),
        worker_id: worker.map(|w| w.id.clone()),
        heartbeat_stale: heartbeat_stale(worker),
        created_at: project.created_at,
        updated_at: project.updated_at,
    }
}

pub async fn create_project(
    State(state): State<ApiState>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectSummary>)> {
    validate_project_name(&request.name)?;

    let llm_credential_enc = request
        .llm_api_key
        .as_deref()
        .map(|key| state.secrets.encrypt(key))
        .transpose()?;
    let extra_env_enc = request
        .extra_env
        .as_ref()
        .map(|env| {
            let blob = serde_json::to_string(env)
                .map_err(|e| ApiError::Validation(e.to_string()))?;
            state.secrets.encrypt(&blob).map_err(ApiError::from)
        })
        .transpose()?;

    let now = Utc::now();
    let status = if request.instance_type.is_some() {
        ProjectStatus::Provisioning
    } else {
        ProjectStatus::Creating
    };
    let project = Project {
        name: request.name.clone(),
        status,
        llm_credential_enc,
        extra_env_enc,
        mcp_servers: request.mcp_servers.clone(),
        instance_type: request.instance_type.clone(),
        worker_id: None,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_project(&project)?;
    info!(project = %project.name, worker = request.instance_type.is_some(), "project created");

    // the sandbox (and worker, when requested) comes up in the background
    let background = state.clone();
    let name = request.name.clone();
    let instance_type = request.instance_type.clone();
    tokio::spawn(async move {
        if let Err(e) = bring_up(&background, &name, instance_type.as_deref()).await {
            error!(project = %name, error = %e, "project bring-up failed");
            let _ = background
                .store
                .update_project_status(&name, ProjectStatus::Error);
        }
    });

    Ok((StatusCode::CREATED, Json(summarize(&project, None))))
}

/// Provision the worker when requested, then create the sandbox.
async fn bring_up(state: &ApiState, name: &str, instance_type: Option<&str>) -> Result<()> {
    if let Some(instance_type) = instance_type {
        let worker = state.provisioner.provision(name, instance_type).await?;
        state.provisioner.await_ready(&worker.id).await?;
        state
            .store
            .update_project_status(name, ProjectStatus::Bootstrapping)?;
    }
    state.manager.create(name).await?;
    Ok(())
}

pub async fn list_projects(State(state): State<ApiState>) -> Result<Json<Vec<ProjectSummary>>> {
    let projects = state.store.list_projects()?;
    let mut summaries = Vec::with_capacity(projects.len());
    for project in &projects {
        let worker = state.store.worker_for_project(&project.name)?;
        summaries.push(summarize(project, worker.as_ref()));
    }
    Ok(Json(summaries))
}

pub async fn get_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<ProjectDetail>> {
    let project = state.store.get_project(&name)?;
    let worker = state.store.worker_for_project(&name)?;
    let task = state.manager.read_task(&name).await.unwrap_or(None);

    Ok(Json(ProjectDetail {
        summary: summarize(&project, worker.as_ref()),
        mcp_servers: project.mcp_servers.clone(),
        task,
        instance: worker.map(|w| InstanceSummary {
            id: w.id,
            instance_type: w.instance_type,
            region: w.region,
            availability_zone: w.availability_zone,
            status: w.status,
            public_ip: w.public_ip,
            last_heartbeat: w.last_heartbeat,
        }),
    }))
}

pub async fn delete_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    // existence check up front so repeats return 404
    state.store.get_project(&name)?;

    if let Err(e) = state.manager.destroy(&name, true).await {
        error!(project = %name, error = %e, "sandbox teardown failed, continuing");
    }
    if let Err(e) = state.provisioner.terminate(&name).await {
        error!(project = %name, error = %e, "worker teardown failed, continuing");
    }
    state.store.delete_project(&name)?;
    info!(project = %name, "project destroyed");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restart_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.store.get_project(&name)?;
    state.manager.restart(&name).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeRequest {
    pub instance_type: String,
}

pub async fn resize_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<ResizeRequest>,
) -> Result<StatusCode> {
    let project = state.store.get_project(&name)?;
    if state.store.worker_for_project(&name)?.is_none() {
        return Err(ApiError::Conflict(format!(
            "project {:?} has no dedicated worker to resize",
            project.name
        )));
    }

    state
        .store
        .update_project_status(&name, ProjectStatus::Resizing)?;

    let background = state.clone();
    let target = request.instance_type.clone();
    tokio::spawn(async move {
        let result = async {
            background.provisioner.resize(&name, &target).await?;
            background.manager.restart(&name).await?;
            Ok::<(), ApiError>(())
        }
        .await;
        if let Err(e) = result {
            error!(project = %name, error = %e, "resize failed");
            let _ = background
                .store
                .update_project_status(&name, ProjectStatus::Error);
        }
    });

    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
}

pub async fn exec_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<serde_json::Value>> {
    if request.cmd.is_empty() {
        return Err(ApiError::Validation("cmd must not be empty".to_string()));
    }
    state.store.get_project(&name)?;
    let output = state.manager.exec(&name, &request.cmd).await?;
    Ok(Json(serde_json::json!({
        "exit_code": output.exit_code,
        "output": output.combined(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

pub async fn message_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<serde_json::Value>> {
    state.store.get_project(&name)?;
    let delivered = state.manager.send_message(&name, &request.message).await?;
    Ok(Json(serde_json::json!({ "delivered": delivered })))
}

#[derive(Debug, Deserialize)]
pub struct SupervisorRequest {
    pub action: String,
}

pub async fn supervisor_project(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<SupervisorRequest>,
) -> Result<Json<serde_json::Value>> {
    let action = parse_supervisor_action(&request.action)?;
    state.store.get_project(&name)?;
    let forwarded = state.manager.supervisor_control(&name, action).await?;
    Ok(Json(serde_json::json!({ "forwarded": forwarded })))
}

pub async fn project_memory(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.store.get_project(&name)?;
    Ok(Json(state.manager.memory(&name).await?))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

pub async fn project_logs(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    axum::extract::Query(query): axum::extract::Query<LogsQuery>,
) -> Result<Json<serde_json::Value>> {
    state.store.get_project(&name)?;
    let lines = query.lines.unwrap_or(100);
    Ok(Json(state.manager.logs(&name, lines).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn project(status: ProjectStatus) -> Project {
        let now = Utc::now();
        Project {
            name: "demo".to_string(),
            status,
            llm_credential_enc: None,
            extra_env_enc: None,
            mcp_servers: vec![],
            instance_type: Some("m6i.large".to_string()),
            worker_id: Some("i-1".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn worker(status: WorkerStatus, heartbeat: Option<chrono::DateTime<Utc>>) -> Worker {
        Worker {
            id: "i-1".to_string(),
            project: "demo".to_string(),
            instance_type: "m6i.large".to_string(),
            region: "us-east-1".to_string(),
            availability_zone: "us-east-1a".to_string(),
            private_ip: None,
            public_ip: None,
            status,
            worker_token: "t".to_string(),
            created_at: Utc::now(),
            last_heartbeat: heartbeat,
        }
    }

    #[test]
    fn worker_state_overrides_when_not_ready() {
        let p = project(ProjectStatus::Running);
        assert_eq!(
            synthesized_status(&p, Some(&worker(WorkerStatus::Provisioning, None))),
            ProjectStatus::Provisioning
        );
        assert_eq!(
            synthesized_status(&p, Some(&worker(WorkerStatus::Stopping, None))),
            ProjectStatus::Resizing
        );
        assert_eq!(
            synthesized_status(&p, Some(&worker(WorkerStatus::Error, None))),
            ProjectStatus::Error
        );
    }

    #[test]
    fn ready_worker_defers_to_project_status() {
        let p = project(ProjectStatus::Running);
        assert_eq!(
            synthesized_status(&p, Some(&worker(WorkerStatus::Ready, None))),
            ProjectStatus::Running
        );
        assert_eq!(synthesized_status(&p, None), ProjectStatus::Running);
    }

    #[test]
    fn heartbeat_staleness() {
        assert!(!heartbeat_stale(None));
        assert!(!heartbeat_stale(Some(&worker(
            WorkerStatus::Ready,
            Some(Utc::now())
        ))));
        let old = Utc::now() - ChronoDuration::seconds(HEARTBEAT_STALE_SECS + 60);
        assert!(heartbeat_stale(Some(&worker(
            WorkerStatus::Ready,
            Some(old)
        ))));
    }
}
