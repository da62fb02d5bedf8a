//! End-to-end exercises of the operator API against an in-memory store,
//! mock sandboxes, and a mock cloud.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::Mutex;
use tower::ServiceExt;

use drover_api::{build_router, hash_token, ApiState};
use drover_core::{ControlConfig, FleetConfig};
use drover_fleet::{
    ContainerManager, FleetError, MockCloud, SandboxFactory, WorkerProbe, WorkerProvisioner,
};
use drover_sandbox::{MockSandbox, Sandbox};
use drover_secrets::SecretBox;
use drover_store::Store;

const TOKEN: &str = "op-token-1";

struct MockFactory {
    sandboxes: Mutex<HashMap<String, Arc<MockSandbox>>>,
}

impl MockFactory {
    fn new() -> Self {
        Self {
            sandboxes: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl SandboxFactory for MockFactory {
    async fn sandbox(&self, project: &str) -> Result<Arc<dyn Sandbox>, FleetError> {
        let sandbox: Arc<dyn Sandbox> = self
            .sandboxes
            .lock()
            .await
            .entry(project.to_string())
            .or_insert_with(|| Arc::new(MockSandbox::new()))
            .clone();
        Ok(sandbox)
    }
}

struct AlwaysHealthy;

#[async_trait::async_trait]
impl WorkerProbe for AlwaysHealthy {
    async fn healthy(&self, _host: &str, _port: u16) -> bool {
        true
    }
}

struct Fixture {
    router: axum::Router,
    _workspace: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store.insert_token(&hash_token(TOKEN), Some("test")).unwrap();

    let secrets = SecretBox::from_master_secret("test-master").unwrap();
    let workspace = tempfile::tempdir().unwrap();
    let fleet_config = FleetConfig {
        gateway_wait_secs: 2,
        gateway_wait_interval_secs: 1,
        worker_wait_secs: 5,
        worker_wait_interval_secs: 1,
        ..FleetConfig::default()
    };

    let manager = Arc::new(ContainerManager::new(
        store.clone(),
        secrets.clone(),
        fleet_config.clone(),
        ControlConfig::default(),
        Arc::new(MockFactory::new()),
        workspace.path().to_path_buf(),
        4015,
        Arc::new(AlwaysHealthy),
    ));
    let provisioner = Arc::new(
        WorkerProvisioner::new(
            Arc::new(MockCloud::new()),
            store.clone(),
            fleet_config,
            "http://127.0.0.1:7700".to_string(),
        )
        .with_probe(Arc::new(AlwaysHealthy)),
    );

    let state = ApiState {
        store,
        secrets,
        manager,
        provisioner,
    };
    Fixture {
        router: build_router(state),
        _workspace: workspace,
    }
}

async fn send(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
    authed: bool,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if authed {
        builder = builder.header("Authorization", format!("Bearer {TOKEN}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_needs_no_auth() {
    let fx = fixture();
    let (status, body) = send(&fx.router, "GET", "/health", None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let fx = fixture();
    let (status, _) = send(&fx.router, "GET", "/api/projects", None, false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_then_list_yields_project_once() {
    let fx = fixture();
    let (status, body) = send(
        &fx.router,
        "POST",
        "/api/projects",
        Some(serde_json::json!({ "name": "demo" })),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "demo");

    let (status, body) = send(&fx.router, "GET", "/api/projects", None, true).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<&serde_json::Value> = body
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["name"] == "demo")
        .collect();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn invalid_project_name_rejected() {
    let fx = fixture();
    for name in ["-bad", "Bad", "bad_name", ""] {
        let (status, _) = send(
            &fx.router,
            "POST",
            "/api/projects",
            Some(serde_json::json!({ "name": name })),
            true,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{name:?} should be rejected");
    }
}

#[tokio::test]
async fn duplicate_project_conflicts() {
    let fx = fixture();
    let body = serde_json::json!({ "name": "demo" });
    let (status, _) = send(&fx.router, "POST", "/api/projects", Some(body.clone()), true).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&fx.router, "POST", "/api/projects", Some(body), true).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn secrets_roundtrip_never_lists_values() {
    let fx = fixture();
    send(
        &fx.router,
        "POST",
        "/api/projects",
        Some(serde_json::json!({ "name": "demo" })),
        true,
    )
    .await;

    let (status, _) = send(
        &fx.router,
        "POST",
        "/api/projects/demo/secrets",
        Some(serde_json::json!({ "key": "HF_TOKEN", "value": "hf-secret-value" })),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&fx.router, "GET", "/api/projects/demo/secrets", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["keys"], serde_json::json!(["HF_TOKEN"]));
    assert!(!body.to_string().contains("hf-secret-value"));

    let (status, _) = send(
        &fx.router,
        "DELETE",
        "/api/projects/demo/secrets/HF_TOKEN",
        None,
        true,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn invalid_secret_key_rejected() {
    let fx = fixture();
    send(
        &fx.router,
        "POST",
        "/api/projects",
        Some(serde_json::json!({ "name": "demo" })),
        true,
    )
    .await;

    for key in ["lower", "9BAD", "BAD-KEY", ""] {
        let (status, _) = send(
            &fx.router,
            "POST",
            "/api/projects/demo/secrets",
            Some(serde_json::json!({ "key": key, "value": "v" })),
            true,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{key:?} should be rejected");
    }
}

#[tokio::test]
async fn task_stop_resume_preserves_id() {
    let fx = fixture();
    send(
        &fx.router,
        "POST",
        "/api/projects",
        Some(serde_json::json!({ "name": "demo" })),
        true,
    )
    .await;

    let (status, task) = send(
        &fx.router,
        "POST",
        "/api/projects/demo/task",
        Some(serde_json::json!({
            "name": "train",
            "description": "train the model",
            "goal": { "description": "accuracy over 0.9" }
        })),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let task_id = task["id"].as_str().unwrap().to_string();
    assert_eq!(task["status"], "running");
    assert_eq!(task["limits"]["max_idle_turns"], 20);
    assert_eq!(task["type"], "subjective");

    let (status, stopped) =
        send(&fx.router, "POST", "/api/projects/demo/task/stop", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["status"], "stopped");

    let (status, resumed) = send(
        &fx.router,
        "POST",
        "/api/projects/demo/task/resume",
        None,
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed["status"], "running");
    assert_eq!(resumed["id"], task_id.as_str());
}

#[tokio::test]
async fn respond_to_unknown_question_is_404() {
    let fx = fixture();
    send(
        &fx.router,
        "POST",
        "/api/projects",
        Some(serde_json::json!({ "name": "demo" })),
        true,
    )
    .await;
    send(
        &fx.router,
        "POST",
        "/api/projects/demo/task",
        Some(serde_json::json!({ "name": "train" })),
        true,
    )
    .await;

    let (status, _) = send(
        &fx.router,
        "POST",
        "/api/projects/demo/task/respond",
        Some(serde_json::json!({ "question_id": "ghost", "answer": "yes" })),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn directives_crud() {
    let fx = fixture();
    send(
        &fx.router,
        "POST",
        "/api/projects",
        Some(serde_json::json!({ "name": "demo" })),
        true,
    )
    .await;

    let (status, directive) = send(
        &fx.router,
        "POST",
        "/api/projects/demo/directives",
        Some(serde_json::json!({ "text": "never force-push" })),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = directive["id"].as_str().unwrap().to_string();

    let (status, listed) = send(
        &fx.router,
        "GET",
        "/api/projects/demo/directives",
        None,
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &fx.router,
        "DELETE",
        &format!("/api/projects/demo/directives/{id}"),
        None,
        true,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, listed) = send(
        &fx.router,
        "GET",
        "/api/projects/demo/directives",
        None,
        true,
    )
    .await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn delete_project_then_repeat_is_not_found() {
    let fx = fixture();
    send(
        &fx.router,
        "POST",
        "/api/projects",
        Some(serde_json::json!({ "name": "demo" })),
        true,
    )
    .await;

    let (status, _) = send(&fx.router, "DELETE", "/api/projects/demo", None, true).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&fx.router, "DELETE", "/api/projects/demo", None, true).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn supervisor_action_validation() {
    let fx = fixture();
    send(
        &fx.router,
        "POST",
        "/api/projects",
        Some(serde_json::json!({ "name": "demo" })),
        true,
    )
    .await;

    let (status, _) = send(
        &fx.router,
        "POST",
        "/api/projects/demo/supervisor",
        Some(serde_json::json!({ "action": "reboot" })),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_ws_requires_token_query() {
    let fx = fixture();
    send(
        &fx.router,
        "POST",
        "/api/projects",
        Some(serde_json::json!({ "name": "demo" })),
        true,
    )
    .await;

    // no token -> unauthorized before any upgrade happens
    let request = Request::builder()
        .method("GET")
        .uri("/ws/projects/demo/chat")
        .header("host", "control.test")
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap();
    let response = fx.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
