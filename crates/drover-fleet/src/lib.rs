//! Fleet management: worker provisioning and transparent sandbox routing.
//!
//! [`WorkerProvisioner`] drives per-project instance lifecycle against a
//! [`CloudProvider`]; [`ContainerManager`] decides local-vs-remote for
//! every sandbox operation from store state alone and composes the
//! sandbox environment deterministically.

mod cloud;
mod error;
mod manager;
mod provisioner;
mod worker_client;

pub use cloud::{CloudProvider, Instance, InstanceState, LaunchRequest, MockCloud};
pub use error::{FleetError, Result};
pub use manager::{
    ChatEndpoint, ContainerManager, DockerSandboxFactory, SandboxFactory,
};
pub use provisioner::{HttpWorkerProbe, WorkerProbe, WorkerProvisioner};
pub use worker_client::{WorkerClient, WorkerExecOutput, WorkerHealth};
