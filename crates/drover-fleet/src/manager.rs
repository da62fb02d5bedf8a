//! Transparent local-vs-remote routing of sandbox operations.
//!
//! The store decides: a ready worker means the sandbox lives on that
//! instance and every operation goes through its worker agent; otherwise
//! the operation runs against the local Docker daemon. Env composition is
//! deterministic so recreates are reproducible.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use drover_core::{ControlConfig, FleetConfig, PROJECT_NAME_ENV, WORKSPACE_PATH};
use drover_sandbox::{DockerSandbox, ExecOutput, Sandbox, SandboxSpec};
use drover_secrets::SecretBox;
use drover_spec::{Directive, Project, ProjectStatus, SupervisorAction, Task, Worker, WorkerStatus};
use drover_store::Store;

use crate::error::{FleetError, Result};
use crate::provisioner::WorkerProbe;
use crate::worker_client::WorkerClient;

/// Fallback agent image for local sandboxes
const DEFAULT_AGENT_IMAGE: &str = "drover-agent:latest";

const EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// Builds the local sandbox adapter for a project
#[async_trait::async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn sandbox(&self, project: &str) -> Result<Arc<dyn Sandbox>>;
}

/// Docker-backed factory used by the control plane in local mode
pub struct DockerSandboxFactory {
    workspace_root: PathBuf,
}

impl DockerSandboxFactory {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait::async_trait]
impl SandboxFactory for DockerSandboxFactory {
    async fn sandbox(&self, project: &str) -> Result<Arc<dyn Sandbox>> {
        let sandbox = DockerSandbox::connect(project, self.workspace_root.clone()).await?;
        Ok(Arc::new(sandbox))
    }
}

/// Where the project chat relay should connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEndpoint {
    pub ws_url: String,
    /// Bearer for the worker relay; local gateways are unauthenticated
    pub bearer: Option<String>,
}

enum Route {
    Local(Arc<dyn Sandbox>),
    Remote(WorkerClient),
}

pub struct ContainerManager {
    store: Arc<Store>,
    secrets: SecretBox,
    fleet: FleetConfig,
    control: ControlConfig,
    factory: Arc<dyn SandboxFactory>,
    workspace_root: PathBuf,
    gateway_port: u16,
    gateway_probe: Arc<dyn WorkerProbe>,
    http: reqwest::Client,
}

impl ContainerManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        secrets: SecretBox,
        fleet: FleetConfig,
        control: ControlConfig,
        factory: Arc<dyn SandboxFactory>,
        workspace_root: PathBuf,
        gateway_port: u16,
        gateway_probe: Arc<dyn WorkerProbe>,
    ) -> Self {
        Self {
            store,
            secrets,
            fleet,
            control,
            factory,
            workspace_root,
            gateway_port,
            gateway_probe,
            http: reqwest::Client::new(),
        }
    }

    /// Remote iff the project has a ready worker.
    async fn route(&self, project: &str) -> Result<Route> {
        if let Some(worker) = self.store.worker_for_project(project)? {
            if worker.status == WorkerStatus::Ready {
                let host = worker_host(&worker)?;
                return Ok(Route::Remote(WorkerClient::new(
                    &host,
                    self.fleet.worker_port,
                    worker.worker_token.clone(),
                )));
            }
        }
        Ok(Route::Local(self.factory.sandbox(project).await?))
    }

    /// Compose the sandbox env map: fixed keys, decrypted secrets, the
    /// decrypted extra-env blob, then instance awareness.
    pub fn compose_env(
        &self,
        project: &Project,
        worker: Option<&Worker>,
    ) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        env.insert(PROJECT_NAME_ENV.to_string(), project.name.clone());

        if let Some(envelope) = &project.llm_credential_enc {
            env.insert("LLM_API_KEY".to_string(), self.secrets.decrypt(envelope)?);
        }

        env.insert(
            "MCP_SERVERS".to_string(),
            serde_json::to_string(&project.mcp_servers).unwrap_or_else(|_| "[]".to_string()),
        );
        env.insert("WORKSPACE".to_string(), WORKSPACE_PATH.to_string());

        for (key, envelope) in self.store.list_secrets(&project.name)? {
            env.insert(key, self.secrets.decrypt(&envelope)?);
        }

        if let Some(envelope) = &project.extra_env_enc {
            let blob = self.secrets.decrypt(envelope)?;
            let extra: BTreeMap<String, String> =
                serde_json::from_str(&blob).unwrap_or_default();
            env.extend(extra);
        }

        match worker {
            Some(worker) => {
                // cpu/memory keys are filled in by the worker agent from
                // the instance it runs on
                env.insert("INSTANCE_TYPE".to_string(), worker.instance_type.clone());
            }
            None => {
                let host = local_capability();
                let cpus = self.control.local_cpus.min(host.0.max(1));
                let memory_mb = self
                    .control
                    .local_memory_mb
                    .min(((host.1 as f64) * 0.9) as u64)
                    .max(1024);
                env.insert("INSTANCE_CPUS".to_string(), cpus.to_string());
                env.insert("INSTANCE_MEMORY_MB".to_string(), memory_mb.to_string());
                env.insert("HOST_CPUS".to_string(), host.0.to_string());
                env.insert("HOST_MEMORY_MB".to_string(), host.1.to_string());
            }
        }

        Ok(env)
    }

    /// Create the project sandbox and wait for its gateway.
    pub async fn create(&self, name: &str) -> Result<()> {
        self.create_inner(name, false).await
    }

    /// Recreate the sandbox with current env; the workspace survives.
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.create_inner(name, true).await
    }

    async fn create_inner(&self, name: &str, restart: bool) -> Result<()> {
        let result = self.try_create(name, restart).await;
        if result.is_err() {
            let _ = self.store.update_project_status(name, ProjectStatus::Error);
        }
        result
    }

    async fn try_create(&self, name: &str, restart: bool) -> Result<()> {
        let project = self.store.get_project(name)?;
        let worker = self.store.worker_for_project(name)?;
        let ready_worker = worker.filter(|w| w.status == WorkerStatus::Ready);
        let env = self.compose_env(&project, ready_worker.as_ref())?;

        match self.route(name).await? {
            Route::Remote(client) => {
                if restart {
                    client.restart_container(&env).await?;
                } else {
                    client.create_container(&env).await?;
                }
            }
            Route::Local(sandbox) => {
                if restart {
                    sandbox.destroy(false).await?;
                }

                let cpus: u32 = env
                    .get("INSTANCE_CPUS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(self.control.local_cpus);
                let memory_mb: u64 = env
                    .get("INSTANCE_MEMORY_MB")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(self.control.local_memory_mb);
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
                sandbox.create(&spec).await?;
                self.wait_local_gateway(name, sandbox.as_ref()).await?;
            }
        }

        self.store.update_project_status(name, ProjectStatus::Running)?;
        info!(project = %name, restart, "sandbox online");
        Ok(())
    }

    async fn wait_local_gateway(&self, name: &str, sandbox: &dyn Sandbox) -> Result<()> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.fleet.gateway_wait_secs);
        loop {
            if let Ok(ip) = sandbox.ip().await {
                if self
                    .gateway_probe
                    .healthy(&ip.to_string(), self.gateway_port)
                    .await
                {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(project = %name, "gateway never became healthy");
                return Err(FleetError::GatewayTimeout {
                    project: name.to_string(),
                    seconds: self.fleet.gateway_wait_secs,
                });
            }
            tokio::time::sleep(Duration::from_secs(self.fleet.gateway_wait_interval_secs)).await;
        }
    }

    /// Tear the sandbox down. Idempotent; the volume goes only on request.
    pub async fn destroy(&self, name: &str, remove_volume: bool) -> Result<()> {
        match self.route(name).await? {
            Route::Remote(client) => client.destroy_container(remove_volume).await,
            Route::Local(sandbox) => Ok(sandbox.destroy(remove_volume).await?),
        }
    }

    pub async fn exec(&self, name: &str, argv: &[String]) -> Result<ExecOutput> {
        match self.route(name).await? {
            Route::Remote(client) => {
                let output = client.exec(argv).await?;
                Ok(ExecOutput {
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            Route::Local(sandbox) => Ok(sandbox.exec(argv, EXEC_TIMEOUT).await?),
        }
    }

    pub async fn write_task(&self, name: &str, task: &Task) -> Result<()> {
        match self.route(name).await? {
            Route::Remote(client) => client.write_task(task).await,
            Route::Local(_) => {
                let dir = self.workspace_root.join(name);
                tokio::fs::create_dir_all(&dir).await?;
                let json = serde_json::to_string_pretty(task)
                    .map_err(|e| FleetError::Worker(e.to_string()))?;
                tokio::fs::write(dir.join(".task.json"), json).await?;
                Ok(())
            }
        }
    }

    /// Read the task document back (local reads the workspace, remote
    /// asks the worker's gateway health for it indirectly via the file).
    pub async fn read_task(&self, name: &str) -> Result<Option<Task>> {
        match self.route(name).await? {
            Route::Remote(client) => {
                let health = client.health().await?;
                let task = health
                    .gateway
                    .and_then(|g| g.get("task").cloned())
                    .and_then(|t| serde_json::from_value(t).ok());
                Ok(task)
            }
            Route::Local(_) => {
                let path = self.workspace_root.join(name).join(".task.json");
                match tokio::fs::read_to_string(&path).await {
                    Ok(raw) => Ok(serde_json::from_str(&raw).ok()),
                    Err(_) => Ok(None),
                }
            }
        }
    }

    pub async fn write_directives(&self, name: &str, directives: &[Directive]) -> Result<()> {
        match self.route(name).await? {
            Route::Remote(client) => client.write_directives(directives).await,
            Route::Local(_) => {
                let dir = self.workspace_root.join(name);
                tokio::fs::create_dir_all(&dir).await?;
                let json = serde_json::to_string_pretty(directives)
                    .map_err(|e| FleetError::Worker(e.to_string()))?;
                tokio::fs::write(dir.join(".operator-directives.json"), json).await?;
                Ok(())
            }
        }
    }

    pub async fn read_directives(&self, name: &str) -> Result<Vec<Directive>> {
        match self.route(name).await? {
            Route::Remote(_client) => {
                // directives are written through us, so the store of record
                // is the workspace file; remote reads go via /memory-style
                // exec to keep the worker surface small
                let output = self
                    .exec(
                        name,
                        &[
                            "cat".to_string(),
                            format!("{WORKSPACE_PATH}/.operator-directives.json"),
                        ],
                    )
                    .await?;
                Ok(serde_json::from_str(&output.stdout).unwrap_or_default())
            }
            Route::Local(_) => {
                let path = self.workspace_root.join(name).join(".operator-directives.json");
                match tokio::fs::read_to_string(&path).await {
                    Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
                    Err(_) => Ok(Vec::new()),
                }
            }
        }
    }

    pub async fn memory(&self, name: &str) -> Result<serde_json::Value> {
        match self.route(name).await? {
            Route::Remote(client) => client.memory().await,
            Route::Local(_) => {
                let dir = self.workspace_root.join(name);
                let read = |file: &str| {
                    let path = dir.join(file);
                    async move { tokio::fs::read_to_string(path).await.unwrap_or_default() }
                };
                Ok(serde_json::json!({
                    "short_term": read("SHORT_TERM_MEMORY.md").await,
                    "long_term": read("LONG_TERM_MEMORY.md").await,
                    "plan": read("plan.md").await,
                }))
            }
        }
    }

    pub async fn logs(&self, name: &str, lines: usize) -> Result<serde_json::Value> {
        match self.route(name).await? {
            Route::Remote(client) => client.logs(lines).await,
            Route::Local(_) => {
                let path = self.workspace_root.join(name).join(".supervisor.log");
                let content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
                let all: Vec<&str> = content.lines().collect();
                let start = all.len().saturating_sub(lines);
                Ok(serde_json::json!({ "lines": all[start..] }))
            }
        }
    }

    pub async fn send_message(&self, name: &str, content: &str) -> Result<bool> {
        match self.route(name).await? {
            Route::Remote(client) => client.send_message(content).await,
            Route::Local(sandbox) => {
                let base = self.local_gateway_base(sandbox.as_ref()).await?;
                let response = self
                    .http
                    .post(format!("{base}/send-message"))
                    .timeout(Duration::from_secs(10))
                    .json(&serde_json::json!({ "message": content }))
                    .send()
                    .await
                    .map_err(|e| FleetError::Worker(e.to_string()))?;
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| FleetError::Worker(e.to_string()))?;
                Ok(body["delivered"].as_bool().unwrap_or(false))
            }
        }
    }

    pub async fn supervisor_control(&self, name: &str, action: SupervisorAction) -> Result<bool> {
        match self.route(name).await? {
            Route::Remote(client) => client.supervisor_control(action).await,
            Route::Local(sandbox) => {
                let base = self.local_gateway_base(sandbox.as_ref()).await?;
                let response = self
                    .http
                    .post(format!("{base}/supervisor/control"))
                    .timeout(Duration::from_secs(10))
                    .json(&serde_json::json!({ "action": action.as_str() }))
                    .send()
                    .await
                    .map_err(|e| FleetError::Worker(e.to_string()))?;
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| FleetError::Worker(e.to_string()))?;
                Ok(body["forwarded"].as_bool().unwrap_or(false))
            }
        }
    }

    /// Where the operator chat relay should connect for this project.
    pub async fn chat_endpoint(&self, name: &str) -> Result<ChatEndpoint> {
        match self.route(name).await? {
            Route::Remote(client) => Ok(ChatEndpoint {
                ws_url: client.gateway_ws_url(),
                bearer: Some(client.token().to_string()),
            }),
            Route::Local(sandbox) => {
                let ip = sandbox.ip().await?;
                Ok(ChatEndpoint {
                    ws_url: format!("ws://{}:{}/ws", ip, self.gateway_port),
                    bearer: None,
                })
            }
        }
    }

    async fn local_gateway_base(&self, sandbox: &dyn Sandbox) -> Result<String> {
        let ip = sandbox.ip().await?;
        Ok(format!("http://{}:{}", ip, self.gateway_port))
    }
}

fn worker_host(worker: &Worker) -> Result<String> {
    worker
        .public_ip
        .clone()
        .or_else(|| worker.private_ip.clone())
        .ok_or_else(|| FleetError::WorkerNotReady {
            project: worker.project.clone(),
        })
}

/// (cpus, memory_mb) of the control-plane host
fn local_capability() -> (u32, u64) {
    let cpus = num_cpus::get() as u32;
    let memory_mb = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|meminfo| {
            meminfo
                .lines()
                .find(|l| l.starts_with("MemTotal:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
        })
        .map(|kb| kb / 1024)
        .unwrap_or(4096);
    (cpus, memory_mb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drover_sandbox::MockSandbox;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct MockFactory {
        sandboxes: Mutex<HashMap<String, Arc<MockSandbox>>>,
    }

    impl MockFactory {
        fn new() -> Self {
            Self {
                sandboxes: Mutex::new(HashMap::new()),
            }
        }

        async fn get(&self, project: &str) -> Arc<MockSandbox> {
            self.sandboxes
                .lock()
                .await
                .entry(project.to_string())
                .or_insert_with(|| Arc::new(MockSandbox::new()))
                .clone()
        }
    }

    #[async_trait::async_trait]
    impl SandboxFactory for MockFactory {
        async fn sandbox(&self, project: &str) -> Result<Arc<dyn Sandbox>> {
            let sandbox: Arc<dyn Sandbox> = self.get(project).await;
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

    fn secretbox() -> SecretBox {
        SecretBox::from_master_secret("test-master-secret").unwrap()
    }

    struct Fixture {
        store: Arc<Store>,
        factory: Arc<MockFactory>,
        manager: ContainerManager,
        _workspace: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let factory = Arc::new(MockFactory::new());
        let workspace = tempfile::tempdir().unwrap();
        let manager = ContainerManager::new(
            store.clone(),
            secretbox(),
            FleetConfig {
                gateway_wait_secs: 2,
                gateway_wait_interval_secs: 1,
                ..FleetConfig::default()
            },
            ControlConfig::default(),
            factory.clone(),
            workspace.path().to_path_buf(),
            4015,
            Arc::new(AlwaysHealthy),
        );
        Fixture {
            store,
            factory,
            manager,
            _workspace: workspace,
        }
    }

    fn seed_project(store: &Store, name: &str) -> Project {
        let now = Utc::now();
        let project = Project {
            name: name.to_string(),
            status: ProjectStatus::Creating,
            llm_credential_enc: None,
            extra_env_enc: None,
            mcp_servers: vec!["filesystem".to_string()],
            instance_type: None,
            worker_id: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_project(&project).unwrap();
        project
    }

    #[tokio::test]
    async fn compose_env_base_keys_and_secrets() {
        let fx = fixture();
        let mut project = seed_project(&fx.store, "demo");
        project.llm_credential_enc = Some(secretbox().encrypt("sk-live-123").unwrap());
        fx.store
            .update_project_credentials(
                "demo",
                project.llm_credential_enc.as_deref(),
                None,
            )
            .unwrap();
        fx.store
            .upsert_secret("demo", "HF_TOKEN", &secretbox().encrypt("hf-abc").unwrap())
            .unwrap();

        let env = fx.manager.compose_env(&project, None).unwrap();
        assert_eq!(env.get("PROJECT_NAME").unwrap(), "demo");
        assert_eq!(env.get("LLM_API_KEY").unwrap(), "sk-live-123");
        assert_eq!(env.get("HF_TOKEN").unwrap(), "hf-abc");
        assert_eq!(env.get("WORKSPACE").unwrap(), "/workspace");
        assert_eq!(env.get("MCP_SERVERS").unwrap(), r#"["filesystem"]"#);
        // local mode carries full instance awareness
        assert!(env.contains_key("INSTANCE_CPUS"));
        assert!(env.contains_key("HOST_MEMORY_MB"));
    }

    #[tokio::test]
    async fn compose_env_extra_blob_merges() {
        let fx = fixture();
        let mut project = seed_project(&fx.store, "demo");
        let blob = secretbox()
            .encrypt(r#"{"WANDB_MODE":"offline","EXTRA":"1"}"#)
            .unwrap();
        project.extra_env_enc = Some(blob);

        let env = fx.manager.compose_env(&project, None).unwrap();
        assert_eq!(env.get("WANDB_MODE").unwrap(), "offline");
        assert_eq!(env.get("EXTRA").unwrap(), "1");
    }

    #[tokio::test]
    async fn tampered_credential_fails_closed() {
        let fx = fixture();
        let mut project = seed_project(&fx.store, "demo");
        let mut envelope = secretbox().encrypt("sk-live-123").unwrap();
        envelope.truncate(envelope.len() - 2);
        project.llm_credential_enc = Some(envelope);

        let err = fx.manager.compose_env(&project, None).unwrap_err();
        assert!(matches!(err, FleetError::Secrets(_)));
    }

    #[tokio::test]
    async fn create_marks_project_running() {
        let fx = fixture();
        seed_project(&fx.store, "demo");

        fx.manager.create("demo").await.unwrap();
        assert_eq!(
            fx.store.get_project("demo").unwrap().status,
            ProjectStatus::Running
        );
        assert!(fx.factory.get("demo").await.is_running().await);
    }

    #[tokio::test]
    async fn restart_preserves_workspace() {
        let fx = fixture();
        seed_project(&fx.store, "demo");
        fx.manager.create("demo").await.unwrap();

        let sandbox = fx.factory.get("demo").await;
        sandbox.write_file("/workspace/marker.txt", "hello").await;

        fx.manager.restart("demo").await.unwrap();
        assert_eq!(
            sandbox.read_file("/workspace/marker.txt").await.as_deref(),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn destroy_with_volume_clears_workspace() {
        let fx = fixture();
        seed_project(&fx.store, "demo");
        fx.manager.create("demo").await.unwrap();

        let sandbox = fx.factory.get("demo").await;
        sandbox.write_file("/workspace/marker.txt", "hello").await;

        fx.manager.destroy("demo", true).await.unwrap();
        assert!(sandbox.read_file("/workspace/marker.txt").await.is_none());
        // idempotent
        fx.manager.destroy("demo", true).await.unwrap();
    }

    #[tokio::test]
    async fn task_roundtrip_local() {
        let fx = fixture();
        seed_project(&fx.store, "demo");

        let task = Task::new("train", "do training");
        fx.manager.write_task("demo", &task).await.unwrap();
        let loaded = fx.manager.read_task("demo").await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
    }

    #[tokio::test]
    async fn directives_roundtrip_local() {
        let fx = fixture();
        seed_project(&fx.store, "demo");

        let directives = vec![Directive::new("never push to main")];
        fx.manager
            .write_directives("demo", &directives)
            .await
            .unwrap();
        let loaded = fx.manager.read_directives("demo").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "never push to main");
    }

    #[tokio::test]
    async fn exec_routes_locally_without_worker() {
        let fx = fixture();
        seed_project(&fx.store, "demo");
        fx.manager.create("demo").await.unwrap();

        let sandbox = fx.factory.get("demo").await;
        sandbox.write_file("/workspace/out.txt", "result").await;

        let output = fx
            .manager
            .exec(
                "demo",
                &["cat".to_string(), "/workspace/out.txt".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(output.stdout, "result");
    }
}
