//! Abstract local execution unit for one project's agent
//!
//! The [`Sandbox`] trait is the only surface the worker agent and the
//! control plane consume; [`DockerSandbox`] adapts it to the local Docker
//! daemon and [`MockSandbox`] backs tests. The workspace survives the
//! sandbox across restarts and resizes and is only released when a destroy
//! asks for it.

mod docker;
mod error;
mod mock;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

pub use docker::DockerSandbox;
pub use error::{Result, SandboxError};
pub use mock::MockSandbox;

/// What to run and with which resources
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSpec {
    /// Container image for the agent runtime
    pub image: String,
    /// Environment map; ordering is deterministic for reproducible creates
    pub env: BTreeMap<String, String>,
    /// CPU budget (whole CPUs)
    pub cpus: u32,
    /// Memory budget in MiB
    pub memory_mb: u64,
}

/// Combined output of one sandbox exec.
///
/// `stdout` is populated on success and failure alike; the agent inspects
/// failure output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr concatenated, stdout first
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Abstract sandbox capability set
#[async_trait::async_trait]
pub trait Sandbox: Send + Sync {
    /// Create (or re-create) the sandbox, reusing the named workspace.
    /// Returns the runtime's sandbox id.
    async fn create(&self, spec: &SandboxSpec) -> Result<String>;

    /// Tear down the sandbox. Idempotent. The workspace is removed only
    /// when `remove_volume` is set.
    async fn destroy(&self, remove_volume: bool) -> Result<()>;

    /// Run a command inside the sandbox with a timeout.
    async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecOutput>;

    /// Internal address of the sandbox, for reaching the in-sandbox gateway.
    async fn ip(&self) -> Result<IpAddr>;

    /// Liveness probe: whether the sandbox's main process is running.
    async fn health(&self) -> Result<bool>;
}
