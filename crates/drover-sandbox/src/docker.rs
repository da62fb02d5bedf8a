//! Docker-based sandbox using bollard
//!
//! One named container per project, with the project workspace bind-mounted
//! from a stable host directory so it outlives container recreation. The
//! worker agent reads curated workspace files straight from that directory.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;

use crate::error::{Result, SandboxError};
use crate::{ExecOutput, Sandbox, SandboxSpec};

/// Fixed workspace mount point inside the sandbox
const WORKSPACE_MOUNT: &str = "/workspace";

/// Grace period for container stop before kill
const STOP_TIMEOUT_SECS: i32 = 10;

/// Docker adapter for [`Sandbox`]
pub struct DockerSandbox {
    docker: Docker,
    project: String,
    workspace_root: PathBuf,
}

impl std::fmt::Debug for DockerSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerSandbox")
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

impl DockerSandbox {
    /// Connect to the local Docker daemon and verify with a ping.
    pub async fn connect(project: impl Into<String>, workspace_root: PathBuf) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::Runtime(format!("failed to connect to Docker: {e}")))?;
        docker
            .ping()
            .await
            .map_err(|e| SandboxError::Runtime(format!("Docker ping failed: {e}")))?;

        tracing::info!("connected to Docker daemon");
        Ok(Self {
            docker,
            project: project.into(),
            workspace_root,
        })
    }

    /// Adapter with a pre-configured bollard client (tests, custom sockets).
    pub fn with_client(
        docker: Docker,
        project: impl Into<String>,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            docker,
            project: project.into(),
            workspace_root,
        }
    }

    fn container_name(&self) -> String {
        format!("drover-{}", self.project)
    }

    /// Host directory bind-mounted as the sandbox workspace
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace_root.join(&self.project)
    }

    async fn pull_if_absent(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!(image = %image, "image already present, skipping pull");
            return Ok(());
        }

        let (name, tag) = match image.rsplit_once(':') {
            Some((n, t)) if !t.contains('/') => (n.to_string(), t.to_string()),
            _ => (image.to_string(), "latest".to_string()),
        };

        tracing::info!(image = %image, "pulling image");
        let options = CreateImageOptions {
            from_image: Some(name),
            tag: Some(tag),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| SandboxError::CreateFailed {
                id: self.container_name(),
                reason: format!("image pull failed: {e}"),
            })?;
        }
        Ok(())
    }

    /// Remove the container if it exists; 404 is success.
    async fn remove_container_if_present(&self) -> Result<()> {
        let name = self.container_name();

        let stop_options = StopContainerOptions {
            t: Some(STOP_TIMEOUT_SECS),
            signal: None,
        };
        let _ = self.docker.stop_container(&name, Some(stop_options)).await;

        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&name, Some(remove_options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(SandboxError::Runtime(format!(
                "failed to remove container {name}: {e}"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Sandbox for DockerSandbox {
    async fn create(&self, spec: &SandboxSpec) -> Result<String> {
        let name = self.container_name();

        // re-create from a clean slate; the workspace directory persists
        self.remove_container_if_present().await?;

        let workspace = self.workspace_dir();
        std::fs::create_dir_all(&workspace)?;

        self.pull_if_absent(&spec.image).await?;

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}",
                workspace.display(),
                WORKSPACE_MOUNT
            )]),
            memory: Some((spec.memory_mb as i64) * 1024 * 1024),
            nano_cpus: Some((spec.cpus as i64) * 1_000_000_000),
            ..Default::default()
        };

        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(env),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(name.clone()),
            platform: String::new(),
        };

        tracing::info!(
            container = %name,
            image = %spec.image,
            cpus = spec.cpus,
            memory_mb = spec.memory_mb,
            "creating sandbox"
        );

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::CreateFailed {
                id: name.clone(),
                reason: e.to_string(),
            })?;

        self.docker
            .start_container(&name, None::<StartContainerOptions>)
            .await
            .map_err(|e| SandboxError::CreateFailed {
                id: name.clone(),
                reason: format!("start failed: {e}"),
            })?;

        tracing::info!(container = %name, id = %created.id, "sandbox online");
        Ok(created.id)
    }

    async fn destroy(&self, remove_volume: bool) -> Result<()> {
        self.remove_container_if_present().await?;

        if remove_volume {
            let workspace = self.workspace_dir();
            if workspace.exists() {
                tracing::info!(path = %workspace.display(), "releasing workspace");
                std::fs::remove_dir_all(&workspace)?;
            }
        }
        Ok(())
    }

    async fn exec(&self, argv: &[String], timeout: Duration) -> Result<ExecOutput> {
        let name = self.container_name();

        let exec_options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            ..Default::default()
        };

        let exec_created = self
            .docker
            .create_exec(&name, exec_options)
            .await
            .map_err(|e| SandboxError::NotFound {
                id: format!("{name}: {e}"),
            })?;

        let run = async {
            let start_result = self
                .docker
                .start_exec(&exec_created.id, None)
                .await
                .map_err(|e| SandboxError::ExecFailed {
                    id: name.clone(),
                    reason: e.to_string(),
                })?;

            let mut stdout = String::new();
            let mut stderr = String::new();

            if let StartExecResults::Attached { mut output, .. } = start_result {
                while let Some(result) = output.next().await {
                    match result {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "error reading exec output");
                        }
                    }
                }
            }

            let inspect = self
                .docker
                .inspect_exec(&exec_created.id)
                .await
                .map_err(|e| SandboxError::ExecFailed {
                    id: name.clone(),
                    reason: format!("inspect failed: {e}"),
                })?;

            Ok(ExecOutput {
                exit_code: inspect.exit_code.unwrap_or(0) as i32,
                stdout,
                stderr,
            })
        };

        tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| SandboxError::Timeout { timeout })?
    }

    async fn ip(&self) -> Result<IpAddr> {
        let name = self.container_name();
        let inspect = self
            .docker
            .inspect_container(&name, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .map_err(|_| SandboxError::NotFound { id: name.clone() })?;

        inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| {
                networks
                    .values()
                    .filter_map(|endpoint| endpoint.ip_address.clone())
                    .find(|ip| !ip.is_empty())
            })
            .and_then(|ip| ip.parse().ok())
            .ok_or(SandboxError::NoAddress { id: name })
    }

    async fn health(&self) -> Result<bool> {
        let name = self.container_name();
        match self
            .docker
            .inspect_container(&name, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(inspect
                .state
                .and_then(|state| state.running)
                .unwrap_or(false)),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(SandboxError::Runtime(e.to_string())),
        }
    }
}
