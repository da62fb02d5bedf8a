//! In-memory sandbox for tests

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::{Result, SandboxError};
use crate::{ExecOutput, Sandbox, SandboxSpec};

#[derive(Debug, Default)]
struct MockState {
    running: bool,
    spec: Option<SandboxSpec>,
    volume_present: bool,
    /// Files surviving in the mock workspace volume
    files: HashMap<String, String>,
}

/// Mock sandbox: records lifecycle calls, keeps a fake workspace, and
/// serves canned exec responses.
pub struct MockSandbox {
    state: RwLock<MockState>,
    exec_responses: RwLock<HashMap<String, ExecOutput>>,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState::default()),
            exec_responses: RwLock::new(HashMap::new()),
        }
    }

    /// Register a canned response for an argv (joined with spaces).
    pub async fn on_exec(&self, argv: &str, output: ExecOutput) {
        self.exec_responses
            .write()
            .await
            .insert(argv.to_string(), output);
    }

    pub async fn write_file(&self, path: &str, content: &str) {
        let mut state = self.state.write().await;
        state.volume_present = true;
        state.files.insert(path.to_string(), content.to_string());
    }

    pub async fn read_file(&self, path: &str) -> Option<String> {
        self.state.read().await.files.get(path).cloned()
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    pub async fn last_spec(&self) -> Option<SandboxSpec> {
        self.state.read().await.spec.clone()
    }
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Sandbox for MockSandbox {
    async fn create(&self, spec: &SandboxSpec) -> Result<String> {
        let mut state = self.state.write().await;
        state.running = true;
        state.volume_present = true;
        state.spec = Some(spec.clone());
        Ok("mock-sandbox".to_string())
    }

    async fn destroy(&self, remove_volume: bool) -> Result<()> {
        let mut state = self.state.write().await;
        state.running = false;
        state.spec = None;
        if remove_volume {
            state.volume_present = false;
            state.files.clear();
        }
        Ok(())
    }

    async fn exec(&self, argv: &[String], _timeout: Duration) -> Result<ExecOutput> {
        let state = self.state.read().await;
        if !state.running {
            return Err(SandboxError::NotFound {
                id: "mock-sandbox".to_string(),
            });
        }

        let key = argv.join(" ");

        // serve file reads from the mock workspace
        if argv.len() == 2 && argv[0] == "cat" {
            if let Some(content) = state.files.get(&argv[1]) {
                return Ok(ExecOutput {
                    exit_code: 0,
                    stdout: content.clone(),
                    stderr: String::new(),
                });
            }
        }

        if let Some(output) = self.exec_responses.read().await.get(&key) {
            return Ok(output.clone());
        }

        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn ip(&self) -> Result<IpAddr> {
        if self.state.read().await.running {
            Ok(IpAddr::V4(Ipv4Addr::new(172, 17, 0, 2)))
        } else {
            Err(SandboxError::NoAddress {
                id: "mock-sandbox".to_string(),
            })
        }
    }

    async fn health(&self) -> Result<bool> {
        Ok(self.state.read().await.running)
    }
}
