//! Control-plane entities: projects, workers, directives

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Project lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Row created, sandbox not yet requested
    Creating,
    /// Dedicated worker instance is being provisioned
    Provisioning,
    /// Worker is up, sandbox/gateway not yet healthy
    Bootstrapping,
    /// Sandbox online and gateway healthy
    Running,
    /// Sandbox stopped, workspace volume retained
    Stopped,
    /// Worker instance-type change in flight
    Resizing,
    /// Last lifecycle operation failed
    Error,
    /// Project destroyed
    Terminated,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Creating => "creating",
            ProjectStatus::Provisioning => "provisioning",
            ProjectStatus::Bootstrapping => "bootstrapping",
            ProjectStatus::Running => "running",
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Resizing => "resizing",
            ProjectStatus::Error => "error",
            ProjectStatus::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(ProjectStatus::Creating),
            "provisioning" => Ok(ProjectStatus::Provisioning),
            "bootstrapping" => Ok(ProjectStatus::Bootstrapping),
            "running" => Ok(ProjectStatus::Running),
            "stopped" => Ok(ProjectStatus::Stopped),
            "resizing" => Ok(ProjectStatus::Resizing),
            "error" => Ok(ProjectStatus::Error),
            "terminated" => Ok(ProjectStatus::Terminated),
            other => Err(format!("unknown project status '{other}'")),
        }
    }
}

/// A project: one sandboxed autonomous agent and its metadata.
///
/// Credential fields hold SecretBox envelopes, never plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique lowercase-alphanumeric-with-dashes name
    pub name: String,
    pub status: ProjectStatus,
    /// Encrypted LLM engine credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_credential_enc: Option<String>,
    /// Encrypted opaque extra-env blob (JSON object of KEY=VALUE pairs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_env_enc: Option<String>,
    /// Enabled model-context server names
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    /// Requested dedicated instance type, if any
    pub instance_type: Option<String>,
    /// Live worker instance id, if any
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Worker instance lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Provisioning,
    Bootstrapping,
    Ready,
    Stopping,
    Terminated,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Provisioning => "provisioning",
            WorkerStatus::Bootstrapping => "bootstrapping",
            WorkerStatus::Ready => "ready",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Terminated => "terminated",
            WorkerStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(WorkerStatus::Provisioning),
            "bootstrapping" => Ok(WorkerStatus::Bootstrapping),
            "ready" => Ok(WorkerStatus::Ready),
            "stopping" => Ok(WorkerStatus::Stopping),
            "terminated" => Ok(WorkerStatus::Terminated),
            "error" => Ok(WorkerStatus::Error),
            other => Err(format!("unknown worker status '{other}'")),
        }
    }
}

/// A dedicated compute instance hosting exactly one project's sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Cloud instance id
    pub id: String,
    /// Owning project name (unique among non-terminated workers)
    pub project: String,
    pub instance_type: String,
    pub region: String,
    pub availability_zone: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub status: WorkerStatus,
    /// 256-bit hex bearer token the worker agent authenticates with.
    /// Never returned through the operator API.
    #[serde(skip_serializing)]
    pub worker_token: String,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// A validated secret key (`^[A-Z_][A-Z0-9_]*$`, at most 128 chars)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SecretKey(pub String);

impl SecretKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operator-pinned instruction re-injected into every supervisor prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Directive {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Directive {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Compute capability the sandbox runs with, alongside host capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    #[serde(rename = "type")]
    pub instance_type: Option<String>,
    pub cpus: u32,
    pub memory_mb: u64,
    pub host_cpus: u32,
    pub host_memory_mb: u64,
}
