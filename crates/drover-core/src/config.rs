//! Configuration structures for the drover daemons
//!
//! One TOML file carries sections for every daemon; each binary reads the
//! sections it needs. All fields have defaults so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Top-level configuration shared by all daemons
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DroverConfig {
    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub supervisor: SupervisorTimings,

    #[serde(default)]
    pub fleet: FleetConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DroverConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = toml::from_str(&raw).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    /// Load from a file if it exists, otherwise defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Control-plane configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlConfig {
    /// Bind address for the operator API
    #[serde(default = "default_control_bind")]
    pub bind: String,

    /// Path of the relational store file
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Root directory of per-project workspaces in local mode
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// CPU budget for sandboxes in local mode
    #[serde(default = "default_local_cpus")]
    pub local_cpus: u32,

    /// Memory budget (MiB) for sandboxes in local mode
    #[serde(default = "default_local_memory_mb")]
    pub local_memory_mb: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: default_control_bind(),
            store_path: default_store_path(),
            workspace_root: default_workspace_root(),
            local_cpus: default_local_cpus(),
            local_memory_mb: default_local_memory_mb(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/var/lib/drover/workspaces")
}

fn default_control_bind() -> String {
    "0.0.0.0:7700".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/drover/drover.db")
}

fn default_local_cpus() -> u32 {
    2
}

fn default_local_memory_mb() -> u64 {
    4096
}

/// Worker-agent configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Bind address for the worker-agent server
    #[serde(default = "default_worker_bind")]
    pub bind: String,

    /// Base URL of the control plane, for heartbeats
    #[serde(default = "default_control_url")]
    pub control_url: String,

    /// Heartbeat cadence in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Delay before the first heartbeat
    #[serde(default = "default_heartbeat_delay")]
    pub heartbeat_initial_delay_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind: default_worker_bind(),
            control_url: default_control_url(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_initial_delay_secs: default_heartbeat_delay(),
        }
    }
}

fn default_worker_bind() -> String {
    "0.0.0.0:7710".to_string()
}

fn default_control_url() -> String {
    "http://127.0.0.1:7700".to_string()
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_heartbeat_delay() -> u64 {
    10
}

/// In-sandbox gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Port the gateway listens on inside the sandbox
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Local port of the upstream LLM engine
    #[serde(default = "default_engine_port")]
    pub engine_port: u16,

    /// Prefix used to build the engine session key
    /// (`main:webchat:<prefix>-<project>`)
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,

    /// Event-history ring capacity
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Initial upstream reconnect backoff in seconds
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_secs: u64,

    /// Maximum upstream reconnect backoff in seconds
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            engine_port: default_engine_port(),
            session_prefix: default_session_prefix(),
            history_capacity: default_history_capacity(),
            reconnect_initial_secs: default_reconnect_initial(),
            reconnect_max_secs: default_reconnect_max(),
        }
    }
}

impl GatewayConfig {
    /// The fixed engine session key for a project
    pub fn session_key(&self, project: &str) -> String {
        format!("main:webchat:{}-{}", self.session_prefix, project)
    }
}

fn default_gateway_port() -> u16 {
    4015
}

fn default_engine_port() -> u16 {
    4020
}

fn default_session_prefix() -> String {
    "drover".to_string()
}

fn default_history_capacity() -> usize {
    50
}

fn default_reconnect_initial() -> u64 {
    2
}

fn default_reconnect_max() -> u64 {
    30
}

/// Supervisor timing knobs, all in seconds unless noted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorTimings {
    /// Hard bound on one turn
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,

    /// Delay after a productive turn
    #[serde(default = "default_productive_delay")]
    pub productive_delay_secs: u64,

    /// Delay after an ok turn
    #[serde(default = "default_ok_delay")]
    pub ok_delay_secs: u64,

    /// Per-idle-turn delay unit (delay = unit * idle streak, capped)
    #[serde(default = "default_idle_delay_unit")]
    pub idle_delay_unit_secs: u64,

    /// Base delay after an empty or errored turn
    #[serde(default = "default_empty_delay")]
    pub empty_delay_secs: u64,

    /// Cap applied to idle and empty backoff
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Settle time after the last human disconnects
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Poll interval while waiting on blocking questions
    #[serde(default = "default_needs_input_poll")]
    pub needs_input_poll_secs: u64,

    /// Restart delay after an unhandled loop error
    #[serde(default = "default_loop_restart")]
    pub loop_restart_secs: u64,

    /// Timeout for the task verify command
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            turn_timeout_secs: default_turn_timeout(),
            productive_delay_secs: default_productive_delay(),
            ok_delay_secs: default_ok_delay(),
            idle_delay_unit_secs: default_idle_delay_unit(),
            empty_delay_secs: default_empty_delay(),
            max_backoff_secs: default_max_backoff(),
            settle_delay_secs: default_settle_delay(),
            needs_input_poll_secs: default_needs_input_poll(),
            loop_restart_secs: default_loop_restart(),
            verify_timeout_secs: default_verify_timeout(),
        }
    }
}

fn default_turn_timeout() -> u64 {
    900
}

fn default_productive_delay() -> u64 {
    15
}

fn default_ok_delay() -> u64 {
    30
}

fn default_idle_delay_unit() -> u64 {
    300
}

fn default_empty_delay() -> u64 {
    120
}

fn default_max_backoff() -> u64 {
    600
}

fn default_settle_delay() -> u64 {
    10
}

fn default_needs_input_poll() -> u64 {
    120
}

fn default_loop_restart() -> u64 {
    30
}

fn default_verify_timeout() -> u64 {
    30
}

/// One tier of the provisioner disk-size table: instance size multiples at
/// or above `min_multiple` get `disk_gib` of root disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskSizeRule {
    pub min_multiple: u32,
    pub disk_gib: u32,
}

/// Provisioner / container-manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    /// Instance-family prefixes treated as GPU instances
    #[serde(default = "default_gpu_families")]
    pub gpu_families: Vec<String>,

    /// Disk size for GPU instances
    #[serde(default = "default_gpu_disk_gib")]
    pub gpu_disk_gib: u32,

    /// Disk tiers by instance size multiple, evaluated largest first
    #[serde(default = "default_disk_table")]
    pub disk_table: Vec<DiskSizeRule>,

    /// Fallback disk size
    #[serde(default = "default_disk_gib")]
    pub default_disk_gib: u32,

    /// Cloud region for new workers
    #[serde(default = "default_region")]
    pub region: String,

    /// Port the worker agent listens on
    #[serde(default = "default_worker_port")]
    pub worker_port: u16,

    /// Total worker health-wait budget after launch, in seconds
    #[serde(default = "default_worker_wait")]
    pub worker_wait_secs: u64,

    /// Interval between worker health probes
    #[serde(default = "default_worker_wait_interval")]
    pub worker_wait_interval_secs: u64,

    /// Total in-sandbox gateway health-wait budget after create/restart
    #[serde(default = "default_gateway_wait")]
    pub gateway_wait_secs: u64,

    /// Interval between gateway health probes
    #[serde(default = "default_gateway_wait_interval")]
    pub gateway_wait_interval_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            gpu_families: default_gpu_families(),
            gpu_disk_gib: default_gpu_disk_gib(),
            disk_table: default_disk_table(),
            default_disk_gib: default_disk_gib(),
            region: default_region(),
            worker_port: default_worker_port(),
            worker_wait_secs: default_worker_wait(),
            worker_wait_interval_secs: default_worker_wait_interval(),
            gateway_wait_secs: default_gateway_wait(),
            gateway_wait_interval_secs: default_gateway_wait_interval(),
        }
    }
}

impl FleetConfig {
    /// Root disk size for an instance type, from the configured table.
    ///
    /// GPU families win first; otherwise the size multiple parsed from the
    /// "Nxlarge" suffix is matched against the tiers, largest first.
    pub fn disk_gib_for(&self, instance_type: &str) -> u32 {
        let family = instance_type.split('.').next().unwrap_or("");
        if self
            .gpu_families
            .iter()
            .any(|prefix| family.starts_with(prefix.as_str()))
        {
            return self.gpu_disk_gib;
        }

        let multiple = size_multiple(instance_type);
        let mut tiers: Vec<&DiskSizeRule> = self.disk_table.iter().collect();
        tiers.sort_by(|a, b| b.min_multiple.cmp(&a.min_multiple));
        for tier in tiers {
            if multiple >= tier.min_multiple {
                return tier.disk_gib;
            }
        }
        self.default_disk_gib
    }
}

/// Parse the size multiple from an instance type: "m6i.4xlarge" -> 4,
/// "m6i.xlarge" -> 1, "m6i.large" -> 0.
fn size_multiple(instance_type: &str) -> u32 {
    let size = instance_type.split('.').nth(1).unwrap_or("");
    if let Some(prefix) = size.strip_suffix("xlarge") {
        if prefix.is_empty() {
            1
        } else {
            prefix.parse().unwrap_or(1)
        }
    } else {
        0
    }
}

fn default_gpu_families() -> Vec<String> {
    ["p", "g", "trn", "inf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_gpu_disk_gib() -> u32 {
    200
}

fn default_disk_table() -> Vec<DiskSizeRule> {
    vec![
        DiskSizeRule {
            min_multiple: 24,
            disk_gib: 500,
        },
        DiskSizeRule {
            min_multiple: 12,
            disk_gib: 200,
        },
        DiskSizeRule {
            min_multiple: 4,
            disk_gib: 100,
        },
    ]
}

fn default_disk_gib() -> u32 {
    50
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_worker_port() -> u16 {
    7710
}

fn default_worker_wait() -> u64 {
    300
}

fn default_worker_wait_interval() -> u64 {
    10
}

fn default_gateway_wait() -> u64 {
    120
}

fn default_gateway_wait_interval() -> u64 {
    2
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file path; stdout when unset
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: DroverConfig = toml::from_str("").unwrap();
        assert_eq!(config.gateway.history_capacity, 50);
        assert_eq!(config.supervisor.turn_timeout_secs, 900);
        assert_eq!(config.worker.heartbeat_interval_secs, 60);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: DroverConfig = toml::from_str(
            r#"
[gateway]
session_prefix = "syn"
"#,
        )
        .unwrap();
        assert_eq!(config.gateway.session_prefix, "syn");
        assert_eq!(config.gateway.port, 4015);
    }

    #[test]
    fn session_key_shape() {
        let config = GatewayConfig::default();
        assert_eq!(config.session_key("demo"), "main:webchat:drover-demo");
    }

    #[test]
    fn disk_table_tiers() {
        let fleet = FleetConfig::default();
        assert_eq!(fleet.disk_gib_for("p4d.24xlarge"), 200); // GPU wins
        assert_eq!(fleet.disk_gib_for("g5.xlarge"), 200);
        assert_eq!(fleet.disk_gib_for("m6i.24xlarge"), 500);
        assert_eq!(fleet.disk_gib_for("m6i.12xlarge"), 200);
        assert_eq!(fleet.disk_gib_for("m6i.4xlarge"), 100);
        assert_eq!(fleet.disk_gib_for("m6i.2xlarge"), 50);
        assert_eq!(fleet.disk_gib_for("m6i.large"), 50);
        assert_eq!(fleet.disk_gib_for("t3.micro"), 50);
    }

    #[test]
    fn size_multiple_parsing() {
        assert_eq!(size_multiple("m6i.xlarge"), 1);
        assert_eq!(size_multiple("m6i.4xlarge"), 4);
        assert_eq!(size_multiple("c7g.16xlarge"), 16);
        assert_eq!(size_multiple("m6i.large"), 0);
        assert_eq!(size_multiple("weird"), 0);
    }

    #[test]
    fn load_missing_file_falls_back() {
        let config =
            DroverConfig::load_or_default(Path::new("/nonexistent/drover.toml")).unwrap();
        assert_eq!(config, DroverConfig::default());
    }
}
