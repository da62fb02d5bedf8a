//! The worker-agent HTTP surface.
//!
//! One server per dedicated instance, owning exactly one project's
//! sandbox: container lifecycle (with a gateway readiness wait), one-shot
//! exec, task and directive writes into the workspace, curated file
//! reads, supervisor-control proxying, one-shot message delivery, and the
//! `/gateway` WebSocket relay.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use drover_sandbox::{Sandbox, SandboxSpec};
use drover_spec::{Directive, Task};

use crate::auth::require_worker_token;
use crate::error::{Result, WorkerError};
use crate::host::{clamp, HostCapability};
use crate::relay;

/// Fallback agent image when the env does not name one
const DEFAULT_AGENT_IMAGE: &str = "drover-agent:latest";

/// Bound on one-shot exec requests
const EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// Default log tail length
const DEFAULT_LOG_LINES: usize = 100;

#[derive(Clone)]
pub struct WorkerState {
    pub project: String,
    pub token: String,
    pub sandbox: Arc<dyn Sandbox>,
    /// Host-side path of the project workspace
    pub workspace: PathBuf,
    pub gateway_port: u16,
    pub gateway_wait: Duration,
    pub gateway_wait_interval: Duration,
    pub http: reqwest::Client,
}

impl WorkerState {
    async fn gateway_base(&self) -> Result<String> {
        let ip = self.sandbox.ip().await?;
        Ok(format!("http://{}:{}", ip, self.gateway_port))
    }

    pub(crate) async fn gateway_ws_url(&self) -> Result<String> {
        let ip = self.sandbox.ip().await?;
        Ok(format!("ws://{}:{}/ws", ip, self.gateway_port))
    }
}

pub fn router(state: WorkerState) -> Router {
    let authed = Router::new()
        .route("/container/create", post(container_create))
        .route("/container/restart", post(container_restart))
        .route("/container/destroy", post(container_destroy))
        .route("/exec", post(exec))
        .route("/task", post(write_task))
        .route("/directives", post(write_directives))
        .route("/memory", get(read_memory))
        .route("/logs", get(read_logs))
        .route("/supervisor/control", post(supervisor_control))
        .route("/message", post(send_message))
        .route("/gateway", get(relay::gateway_ws))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_worker_token,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(authed)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    container_running: bool,
    gateway: Option<serde_json::Value>,
}

async fn health(State(state): State<WorkerState>) -> Json<HealthResponse> {
    let container_running = state.sandbox.health().await.unwrap_or(false);

    let mut gateway = None;
    if container_running {
        if let Ok(base) = state.gateway_base().await {
            if let Ok(response) = state
                .http
                .get(format!("{base}/health"))
                .timeout(Duration::from_secs(5))
                .send()
                .await
            {
                if response.status().is_success() {
                    gateway = response.json().await.ok();
                }
            }
        }
    }

    Json(HealthResponse {
        ok: true,
        container_running,
        gateway,
    })
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct CreateResponse {
    sandbox_id: String,
}

async fn container_create(
    State(state): State<WorkerState>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<CreateResponse>> {
    let sandbox_id = create_sandbox(&state, request.env).await?;
    Ok(Json(CreateResponse { sandbox_id }))
}

async fn container_restart(
    State(state): State<WorkerState>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<CreateResponse>> {
    // destroy without the volume: the workspace survives
    state.sandbox.destroy(false).await?;
    let sandbox_id = create_sandbox(&state, request.env).await?;
    Ok(Json(CreateResponse { sandbox_id }))
}

/// Build the spec (clamping resources to host capability), create the
/// sandbox, and wait for the in-sandbox gateway to come up. On timeout
/// the sandbox is destroyed.
async fn create_sandbox(
    state: &WorkerState,
    mut env: BTreeMap<String, String>,
) -> Result<String> {
    let host = HostCapability::detect();
    let requested_cpus: u32 = env
        .get("INSTANCE_CPUS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(host.cpus);
    let requested_memory: u64 = env
        .get("INSTANCE_MEMORY_MB")
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| host.usable_memory_mb());

    let (cpus, memory_mb) = clamp(requested_cpus, requested_memory, host);
    env.insert("INSTANCE_CPUS".to_string(), cpus.to_string());
    env.insert("INSTANCE_MEMORY_MB".to_string(), memory_mb.to_string());
    env.insert("HOST_CPUS".to_string(), host.cpus.to_string());
    env.insert("HOST_MEMORY_MB".to_string(), host.memory_mb.to_string());

    let image = env
        .get("AGENT_IMAGE")
        .cloned()
        .unwrap_or_else(|| DEFAULT_AGENT_IMAGE.to_string());

    let spec = SandboxSpec {
        image,
        env,
        cpus,
        memory_mb,
    };

    let sandbox_id = state.sandbox.create(&spec).await?;
    info!(project = %state.project, sandbox = %sandbox_id, "sandbox created");

    if let Err(e) = wait_for_gateway(state).await {
        warn!(error = %e, "gateway never came up, destroying sandbox");
        let _ = state.sandbox.destroy(false).await;
        return Err(e);
    }
    Ok(sandbox_id)
}

/// Probe the in-sandbox gateway until it reports healthy.
async fn wait_for_gateway(state: &WorkerState) -> Result<()> {
    let deadline = Instant::now() + state.gateway_wait;
    loop {
        if let Ok(base) = state.gateway_base().await {
            let probe = state
                .http
                .get(format!("{base}/health"))
                .timeout(Duration::from_secs(5))
                .send()
                .await;
            if matches!(&probe, Ok(resp) if resp.status().is_success()) {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(WorkerError::GatewayTimeout {
                seconds: state.gateway_wait.as_secs(),
            });
        }
        tokio::time::sleep(state.gateway_wait_interval).await;
    }
}

#[derive(Debug, Deserialize)]
struct DestroyRequest {
    #[serde(default)]
    remove_volume: bool,
}

async fn container_destroy(
    State(state): State<WorkerState>,
    Json(request): Json<DestroyRequest>,
) -> Result<Json<serde_json::Value>> {
    state.sandbox.destroy(request.remove_volume).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct ExecRequest {
    argv: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ExecResponse {
    exit_code: i32,
    stdout: String,
    stderr: String,
    output: String,
}

async fn exec(
    State(state): State<WorkerState>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<ExecResponse>> {
    if request.argv.is_empty() {
        return Err(WorkerError::BadRequest("argv must not be empty".to_string()));
    }
    let result = state.sandbox.exec(&request.argv, EXEC_TIMEOUT).await?;
    Ok(Json(ExecResponse {
        exit_code: result.exit_code,
        output: result.combined(),
        stdout: result.stdout,
        stderr: result.stderr,
    }))
}

async fn write_task(
    State(state): State<WorkerState>,
    Json(task): Json<Task>,
) -> Result<Json<serde_json::Value>> {
    let json = serde_json::to_string_pretty(&task)
        .map_err(|e| WorkerError::BadRequest(e.to_string()))?;
    tokio::fs::create_dir_all(&state.workspace).await?;
    tokio::fs::write(state.workspace.join(".task.json"), json).await?;
    info!(task = %task.id, "task document written");
    Ok(Json(serde_json::json!({ "ok": true, "task_id": task.id })))
}

async fn write_directives(
    State(state): State<WorkerState>,
    Json(directives): Json<Vec<Directive>>,
) -> Result<Json<serde_json::Value>> {
    let json = serde_json::to_string_pretty(&directives)
        .map_err(|e| WorkerError::BadRequest(e.to_string()))?;
    tokio::fs::create_dir_all(&state.workspace).await?;
    tokio::fs::write(state.workspace.join(".operator-directives.json"), json).await?;
    Ok(Json(serde_json::json!({ "ok": true, "count": directives.len() })))
}

#[derive(Debug, Serialize)]
struct MemoryResponse {
    short_term: String,
    long_term: String,
    plan: String,
}

async fn read_memory(State(state): State<WorkerState>) -> Json<MemoryResponse> {
    let read = |name: &str| {
        let path = state.workspace.join(name);
        async move { tokio::fs::read_to_string(path).await.unwrap_or_default() }
    };
    Json(MemoryResponse {
        short_term: read("SHORT_TERM_MEMORY.md").await,
        long_term: read("LONG_TERM_MEMORY.md").await,
        plan: read("plan.md").await,
    })
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    lines: Option<usize>,
}

async fn read_logs(
    State(state): State<WorkerState>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let lines = query.lines.unwrap_or(DEFAULT_LOG_LINES);
    let content = tokio::fs::read_to_string(state.workspace.join(".supervisor.log"))
        .await
        .unwrap_or_default();
    let tail: Vec<&str> = {
        let all: Vec<&str> = content.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].to_vec()
    };
    Json(serde_json::json!({ "lines": tail }))
}

#[derive(Debug, Deserialize, Serialize)]
struct ControlRequest {
    action: String,
}

async fn supervisor_control(
    State(state): State<WorkerState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<serde_json::Value>> {
    let base = state.gateway_base().await?;
    let response = state
        .http
        .post(format!("{base}/supervisor/control"))
        .timeout(Duration::from_secs(5))
        .json(&request)
        .send()
        .await
        .map_err(|e| WorkerError::GatewayUnreachable(e.to_string()))?;
    let body = response
        .json()
        .await
        .map_err(|e| WorkerError::GatewayUnreachable(e.to_string()))?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    content: String,
}

async fn send_message(
    State(state): State<WorkerState>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<serde_json::Value>> {
    let url = state.gateway_ws_url().await?;
    let delivered = relay::deliver_one_message(&url, &request.content).await;
    Ok(Json(serde_json::json!({ "delivered": delivered })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use drover_sandbox::MockSandbox;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn state(workspace: PathBuf) -> WorkerState {
        WorkerState {
            project: "demo".to_string(),
            token: "secret-token".to_string(),
            sandbox: Arc::new(MockSandbox::new()),
            workspace,
            gateway_port: 4015,
            gateway_wait: Duration::from_millis(200),
            gateway_wait_interval: Duration::from_millis(50),
            http: reqwest::Client::new(),
        }
    }

    fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
        request.header("Authorization", "Bearer secret-token")
    }

    #[tokio::test]
    async fn health_needs_no_auth() {
        let dir = tempdir().unwrap();
        let app = router(state(dir.path().to_path_buf()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn authed_routes_reject_bad_tokens() {
        let dir = tempdir().unwrap();
        let app = router(state(dir.path().to_path_buf()));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/memory")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/memory")
                    .header("Authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn task_write_lands_in_workspace() {
        let dir = tempdir().unwrap();
        let app = router(state(dir.path().to_path_buf()));

        let task = Task::new("train", "train the model");
        let response = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/task"))
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&task).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let written = std::fs::read_to_string(dir.path().join(".task.json")).unwrap();
        let reloaded: Task = serde_json::from_str(&written).unwrap();
        assert_eq!(reloaded.id, task.id);
    }

    #[tokio::test]
    async fn memory_reads_canonical_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("SHORT_TERM_MEMORY.md"), "short").unwrap();
        std::fs::write(dir.path().join("plan.md"), "the plan").unwrap();
        let app = router(state(dir.path().to_path_buf()));

        let response = app
            .oneshot(
                authed(Request::builder().method("GET").uri("/memory"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["short_term"], "short");
        assert_eq!(body["plan"], "the plan");
        assert_eq!(body["long_term"], "");
    }

    #[tokio::test]
    async fn logs_tail_respects_line_count() {
        let dir = tempdir().unwrap();
        let log: String = (1..=10).map(|n| format!("line {n}\n")).collect();
        std::fs::write(dir.path().join(".supervisor.log"), log).unwrap();
        let app = router(state(dir.path().to_path_buf()));

        let response = app
            .oneshot(
                authed(Request::builder().method("GET").uri("/logs?lines=3"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let lines = body["lines"].as_array().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "line 8");
        assert_eq!(lines[2], "line 10");
    }

    #[tokio::test]
    async fn exec_rejects_empty_argv() {
        let dir = tempdir().unwrap();
        let app = router(state(dir.path().to_path_buf()));
        let response = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/exec"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"argv":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let dir = tempdir().unwrap();
        let app = router(state(dir.path().to_path_buf()));
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    authed(Request::builder().method("POST").uri("/container/destroy"))
                        .header("content-type", "application/json")
                        .body(Body::from(r#"{"remove_volume":false}"#))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
