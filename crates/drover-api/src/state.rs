//! Shared state for the API handlers

use std::sync::Arc;

use drover_fleet::{ContainerManager, WorkerProvisioner};
use drover_secrets::SecretBox;
use drover_store::Store;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<Store>,
    pub secrets: SecretBox,
    pub manager: Arc<ContainerManager>,
    pub provisioner: Arc<WorkerProvisioner>,
}
