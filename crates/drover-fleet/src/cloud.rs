//! Cloud provider abstraction for worker instances.
//!
//! Real drivers live outside this crate; the provisioner only consumes
//! this trait. [`MockCloud`] backs the lifecycle tests with instant
//! transitions.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::{FleetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

/// A compute instance as the provider reports it
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    pub instance_type: String,
    pub availability_zone: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub state: InstanceState,
}

/// What to launch
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub instance_type: String,
    pub region: String,
    pub disk_gib: u32,
    pub image: String,
    /// Bootstrap script that brings up the worker agent
    pub user_data: String,
}

#[async_trait::async_trait]
pub trait CloudProvider: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<Instance>;
    async fn describe(&self, id: &str) -> Result<Instance>;
    async fn stop(&self, id: &str) -> Result<()>;
    async fn start(&self, id: &str) -> Result<()>;
    async fn modify_instance_type(&self, id: &str, instance_type: &str) -> Result<()>;
    async fn terminate(&self, id: &str) -> Result<()>;
    /// Newest base image for worker instances
    async fn latest_base_image(&self) -> Result<String>;

    /// Poll until the instance is stopped.
    async fn wait_until_stopped(&self, id: &str, timeout: Duration) -> Result<()> {
        wait_for_state(self, id, InstanceState::Stopped, timeout).await?;
        Ok(())
    }

    /// Poll until the instance is running; returns the fresh description
    /// (addresses may have changed).
    async fn wait_until_running(&self, id: &str, timeout: Duration) -> Result<Instance> {
        wait_for_state(self, id, InstanceState::Running, timeout).await
    }
}

async fn wait_for_state<P: CloudProvider + ?Sized>(
    provider: &P,
    id: &str,
    target: InstanceState,
    timeout: Duration,
) -> Result<Instance> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let instance = provider.describe(id).await?;
        if instance.state == target {
            return Ok(instance);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(FleetError::Timeout {
                operation: format!("waiting for instance {id} to reach {target:?}"),
                seconds: timeout.as_secs(),
            });
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

/// In-memory provider for tests: every transition applies immediately.
pub struct MockCloud {
    instances: RwLock<HashMap<String, Instance>>,
    counter: std::sync::atomic::AtomicU32,
}

impl MockCloud {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            counter: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CloudProvider for MockCloud {
    async fn launch(&self, request: &LaunchRequest) -> Result<Instance> {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let instance = Instance {
            id: format!("i-mock{n:04}"),
            instance_type: request.instance_type.clone(),
            availability_zone: format!("{}a", request.region),
            private_ip: Some(format!("10.0.0.{}", 10 + n)),
            public_ip: Some(format!("198.51.100.{}", 10 + n)),
            state: InstanceState::Running,
        };
        self.instances
            .write()
            .await
            .insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn describe(&self, id: &str) -> Result<Instance> {
        self.instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::Cloud(format!("instance {id} not found")))
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.set_state(id, InstanceState::Stopped).await
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.set_state(id, InstanceState::Running).await
    }

    async fn modify_instance_type(&self, id: &str, instance_type: &str) -> Result<()> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| FleetError::Cloud(format!("instance {id} not found")))?;
        if instance.state != InstanceState::Stopped {
            return Err(FleetError::Cloud(
                "instance type can only change while stopped".to_string(),
            ));
        }
        instance.instance_type = instance_type.to_string();
        Ok(())
    }

    async fn terminate(&self, id: &str) -> Result<()> {
        self.set_state(id, InstanceState::Terminated).await
    }

    async fn latest_base_image(&self) -> Result<String> {
        Ok("img-drover-worker-000042".to_string())
    }
}

impl MockCloud {
    async fn set_state(&self, id: &str, state: InstanceState) -> Result<()> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| FleetError::Cloud(format!("instance {id} not found")))?;
        instance.state = state;
        Ok(())
    }
}
