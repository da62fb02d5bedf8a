//! Per-project worker instance lifecycle.
//!
//! Provisioning inserts the worker row immediately and lets the caller
//! background the readiness wait; every failure lands in
//! `worker.status = error` and is never retried from here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::RngCore;
use tracing::{info, warn};

use drover_core::FleetConfig;
use drover_spec::{Worker, WorkerStatus};
use drover_store::Store;

use crate::cloud::{CloudProvider, LaunchRequest};
use crate::error::{FleetError, Result};

/// Instance stop/start waits during resize
const INSTANCE_WAIT: Duration = Duration::from_secs(180);

/// Liveness probe against a worker agent
#[async_trait::async_trait]
pub trait WorkerProbe: Send + Sync {
    async fn healthy(&self, host: &str, port: u16) -> bool;
}

/// Probes `GET /health` over plain HTTP
pub struct HttpWorkerProbe {
    http: reqwest::Client,
}

impl HttpWorkerProbe {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpWorkerProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WorkerProbe for HttpWorkerProbe {
    async fn healthy(&self, host: &str, port: u16) -> bool {
        let url = format!("http://{host}:{port}/health");
        matches!(
            self.http
                .get(&url)
                .timeout(Duration::from_secs(5))
                .send()
                .await,
            Ok(response) if response.status().is_success()
        )
    }
}

pub struct WorkerProvisioner {
    cloud: Arc<dyn CloudProvider>,
    store: Arc<Store>,
    config: FleetConfig,
    control_url: String,
    probe: Arc<dyn WorkerProbe>,
}

impl WorkerProvisioner {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        store: Arc<Store>,
        config: FleetConfig,
        control_url: String,
    ) -> Self {
        Self {
            cloud,
            store,
            config,
            control_url,
            probe: Arc::new(HttpWorkerProbe::new()),
        }
    }

    /// Replace the health probe (tests).
    pub fn with_probe(mut self, probe: Arc<dyn WorkerProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Launch an instance for the project and record the worker as
    /// provisioning. The caller backgrounds [`Self::await_ready`].
    pub async fn provision(&self, project: &str, instance_type: &str) -> Result<Worker> {
        let worker_token = generate_token();
        let disk_gib = self.config.disk_gib_for(instance_type);
        let image = self.cloud.latest_base_image().await?;

        let request = LaunchRequest {
            instance_type: instance_type.to_string(),
            region: self.config.region.clone(),
            disk_gib,
            image,
            user_data: bootstrap_user_data(
                project,
                &worker_token,
                &self.control_url,
                self.config.worker_port,
            ),
        };

        info!(
            project = %project,
            instance_type = %instance_type,
            disk_gib,
            "launching worker instance"
        );
        let instance = self.cloud.launch(&request).await?;

        let worker = Worker {
            id: instance.id.clone(),
            project: project.to_string(),
            instance_type: instance_type.to_string(),
            region: self.config.region.clone(),
            availability_zone: instance.availability_zone.clone(),
            private_ip: instance.private_ip.clone(),
            public_ip: instance.public_ip.clone(),
            status: WorkerStatus::Provisioning,
            worker_token,
            created_at: Utc::now(),
            last_heartbeat: None,
        };
        self.store.insert_worker(&worker)?;
        self.store.set_project_worker(project, Some(&worker.id))?;
        Ok(worker)
    }

    /// Wait for IP assignment and a healthy worker agent. On success the
    /// worker is ready; on timeout it is marked errored.
    pub async fn await_ready(&self, worker_id: &str) -> Result<()> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.worker_wait_secs);
        let interval = Duration::from_secs(self.config.worker_wait_interval_secs);

        loop {
            let described = self.cloud.describe(worker_id).await;
            if let Ok(instance) = &described {
                self.store.update_worker_ips(
                    worker_id,
                    instance.private_ip.as_deref(),
                    instance.public_ip.as_deref(),
                )?;
                if let Some(host) = instance.public_ip.as_deref().or(instance.private_ip.as_deref())
                {
                    if self.probe.healthy(host, self.config.worker_port).await {
                        self.store
                            .update_worker_status(worker_id, WorkerStatus::Ready)?;
                        info!(worker = %worker_id, "worker ready");
                        return Ok(());
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(worker = %worker_id, "worker never became healthy");
                self.store
                    .update_worker_status(worker_id, WorkerStatus::Error)?;
                return Err(FleetError::Timeout {
                    operation: format!("waiting for worker {worker_id}"),
                    seconds: self.config.worker_wait_secs,
                });
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Stop, retype, restart, and re-await the project's worker. The
    /// workspace volume on the instance survives.
    pub async fn resize(&self, project: &str, new_instance_type: &str) -> Result<Worker> {
        let worker = self
            .store
            .worker_for_project(project)?
            .ok_or_else(|| FleetError::WorkerNotReady {
                project: project.to_string(),
            })?;

        let result = self.resize_inner(&worker, new_instance_type).await;
        if result.is_err() {
            let _ = self
                .store
                .update_worker_status(&worker.id, WorkerStatus::Error);
        }
        result
    }

    async fn resize_inner(&self, worker: &Worker, new_instance_type: &str) -> Result<Worker> {
        info!(
            worker = %worker.id,
            from = %worker.instance_type,
            to = %new_instance_type,
            "resizing worker"
        );

        self.store
            .update_worker_status(&worker.id, WorkerStatus::Stopping)?;
        self.cloud.stop(&worker.id).await?;
        self.cloud.wait_until_stopped(&worker.id, INSTANCE_WAIT).await?;

        self.cloud
            .modify_instance_type(&worker.id, new_instance_type)
            .await?;
        self.store
            .update_worker_instance_type(&worker.id, new_instance_type)?;

        self.cloud.start(&worker.id).await?;
        let instance = self.cloud.wait_until_running(&worker.id, INSTANCE_WAIT).await?;

        // addresses can change across a stop/start cycle
        self.store.update_worker_ips(
            &worker.id,
            instance.private_ip.as_deref(),
            instance.public_ip.as_deref(),
        )?;
        self.store
            .update_worker_status(&worker.id, WorkerStatus::Bootstrapping)?;

        self.await_ready(&worker.id).await?;
        Ok(self.store.get_worker(&worker.id)?)
    }

    /// Best-effort instance teardown; the worker row ends terminated
    /// either way.
    pub async fn terminate(&self, project: &str) -> Result<()> {
        let Some(worker) = self.store.worker_for_project(project)? else {
            return Ok(());
        };

        self.store
            .update_worker_status(&worker.id, WorkerStatus::Stopping)?;
        if let Err(e) = self.cloud.terminate(&worker.id).await {
            warn!(worker = %worker.id, error = %e, "instance terminate failed, continuing");
        }
        self.store
            .update_worker_status(&worker.id, WorkerStatus::Terminated)?;
        self.store.set_project_worker(project, None)?;
        info!(worker = %worker.id, "worker terminated");
        Ok(())
    }
}

/// 256-bit random token, hex encoded
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Bootstrap script baked into instance user-data. It installs nothing
/// itself; the base image ships the worker agent binary.
fn bootstrap_user_data(project: &str, token: &str, control_url: &str, port: u16) -> String {
    format!(
        "#!/bin/sh\nset -e\nmkdir -p /etc/drover\n\
         cat > /etc/drover/worker.env <<EOF\n\
         DROVER_PROJECT={project}\n\
         DROVER_WORKER_TOKEN={token}\n\
         DROVER_CONTROL_URL={control_url}\n\
         DROVER_WORKER_PORT={port}\n\
         EOF\n\
         systemctl enable --now drover-workerd\n"
    )
}
