//! Shared data model for the drover fleet runtime
//!
//! This crate defines the entities persisted by the control plane
//! (projects, workers), the task document the supervisor drives against,
//! and the wire frames exchanged between the gateway and its clients.
//! Validation of operator-supplied identifiers lives in [`validate`].

mod error;
mod task;
mod types;
pub mod validate;
mod wire;

pub use error::ValidationError;
pub use task::{
    GoalDirection, Question, QuestionPriority, Task, TaskContext, TaskGoal, TaskLimits,
    TaskProgress, TaskStatus, TaskType,
};
pub use types::{
    Directive, InstanceInfo, Project, ProjectStatus, SecretKey, Worker, WorkerStatus,
};
pub use wire::{ClientFrame, ClientRole, Event, ServerFrame, SupervisorAction};
