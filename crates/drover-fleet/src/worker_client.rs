//! HTTP client for a remote worker agent

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use drover_spec::{Directive, SupervisorAction, Task};

use crate::error::{FleetError, Result};

/// Health probes stay short; lifecycle calls get a provisioning budget.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(180);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct WorkerClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
pub struct WorkerHealth {
    pub ok: bool,
    pub container_running: bool,
    #[serde(default)]
    pub gateway: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub output: String,
}

impl WorkerClient {
    pub fn new(host: &str, port: u16, token: impl Into<String>) -> Self {
        Self {
            base_url: format!("http://{host}:{port}"),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// WebSocket URL of the worker's gateway relay.
    pub fn gateway_ws_url(&self) -> String {
        format!("{}/gateway", self.base_url.replacen("http", "ws", 1))
    }

    pub async fn health(&self) -> Result<WorkerHealth> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| FleetError::Worker(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| FleetError::Worker(e.to_string()))
    }

    pub async fn create_container(&self, env: &BTreeMap<String, String>) -> Result<String> {
        let body: serde_json::Value = self
            .post("/container/create", &json!({ "env": env }), LIFECYCLE_TIMEOUT)
            .await?;
        Ok(body["sandbox_id"].as_str().unwrap_or_default().to_string())
    }

    pub async fn restart_container(&self, env: &BTreeMap<String, String>) -> Result<String> {
        let body: serde_json::Value = self
            .post("/container/restart", &json!({ "env": env }), LIFECYCLE_TIMEOUT)
            .await?;
        Ok(body["sandbox_id"].as_str().unwrap_or_default().to_string())
    }

    pub async fn destroy_container(&self, remove_volume: bool) -> Result<()> {
        let _: serde_json::Value = self
            .post(
                "/container/destroy",
                &json!({ "remove_volume": remove_volume }),
                LIFECYCLE_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    pub async fn exec(&self, argv: &[String]) -> Result<WorkerExecOutput> {
        self.post("/exec", &json!({ "argv": argv }), LIFECYCLE_TIMEOUT)
            .await
    }

    pub async fn write_task(&self, task: &Task) -> Result<()> {
        let _: serde_json::Value = self.post("/task", task, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    pub async fn write_directives(&self, directives: &[Directive]) -> Result<()> {
        let _: serde_json::Value = self.post("/directives", &directives, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    pub async fn memory(&self) -> Result<serde_json::Value> {
        self.get("/memory", REQUEST_TIMEOUT).await
    }

    pub async fn logs(&self, lines: usize) -> Result<serde_json::Value> {
        self.get(&format!("/logs?lines={lines}"), REQUEST_TIMEOUT).await
    }

    pub async fn supervisor_control(&self, action: SupervisorAction) -> Result<bool> {
        let body: serde_json::Value = self
            .post(
                "/supervisor/control",
                &json!({ "action": action.as_str() }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(body["forwarded"].as_bool().unwrap_or(false))
    }

    pub async fn send_message(&self, content: &str) -> Result<bool> {
        let body: serde_json::Value = self
            .post("/message", &json!({ "content": content }), REQUEST_TIMEOUT)
            .await?;
        Ok(body["delivered"].as_bool().unwrap_or(false))
    }

    async fn post<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| FleetError::Worker(e.to_string()))?;
        Self::read(response).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, timeout: Duration) -> Result<T> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FleetError::Worker(e.to_string()))?;
        Self::read(response).await
    }

    async fn read<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FleetError::Worker(format!(
                "worker returned {status}: {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| FleetError::Worker(e.to_string()))
    }
}
