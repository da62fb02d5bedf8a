//! Task document IO and goal enforcement.
//!
//! The document at `/workspace/.task.json` is last-writer-wins between
//! the agent and the supervisor, so every decision here starts from a
//! fresh reload. The supervisor writes back on progress and state
//! transitions, and archives the memory files when a task completes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tracing::{info, warn};

use drover_spec::{Task, TaskStatus};

use crate::error::{Result, SupervisorError};
use crate::memory::{LONG_TERM_FILE, PLAN_FILE, SHORT_TERM_FILE};
use crate::metrics::TurnClass;

pub const TASK_FILE: &str = ".task.json";
pub const ARCHIVE_DIR: &str = ".task-archive";

/// Turns of periodic verification cadence
const PERIODIC_VERIFY_EVERY: u32 = 10;

/// Task document storage in the workspace
#[derive(Debug, Clone)]
pub struct TaskStore {
    workspace: PathBuf,
}

impl TaskStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }

    fn path(&self) -> PathBuf {
        self.workspace.join(TASK_FILE)
    }

    /// Reload from disk; absent or unreadable documents yield None.
    pub async fn load(&self) -> Option<Task> {
        let raw = tokio::fs::read_to_string(self.path()).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(task) => Some(task),
            Err(e) => {
                warn!(error = %e, "task document unreadable");
                None
            }
        }
    }

    /// Write back atomically (temp file + rename).
    pub async fn save(&self, task: &Task) -> Result<()> {
        let json = serde_json::to_string_pretty(task)
            .map_err(|e| SupervisorError::TaskDoc(e.to_string()))?;
        let tmp = self.workspace.join(".task.json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, self.path()).await?;
        Ok(())
    }

    /// Copy the canonical memory files into the task archive.
    pub async fn archive_memory(&self, task_id: &str) -> Result<()> {
        let archive = self.workspace.join(ARCHIVE_DIR).join(task_id);
        tokio::fs::create_dir_all(&archive).await?;
        for file in [SHORT_TERM_FILE, LONG_TERM_FILE, PLAN_FILE] {
            let source = self.workspace.join(file);
            if source.exists() {
                tokio::fs::copy(&source, archive.join(file)).await?;
            }
        }
        info!(task = %task_id, "memory files archived");
        Ok(())
    }
}

/// Outcome of one enforcement pass
#[derive(Debug, Clone)]
pub enum TaskVerdict {
    /// No task document present
    NoTask,
    /// Task is running; updated document included
    Running(Task),
    /// Task reached a terminal completed state
    Completed(Task),
    /// Task was stopped (limit hit or operator stop)
    Stopped(Task, String),
    /// The agent claimed completion but verification failed
    VerifyFailed(Task, String),
}

/// Applies goal, verification, and limit rules after each turn
#[derive(Debug)]
pub struct TaskEnforcer {
    store: TaskStore,
    verify_timeout: Duration,
    productive_since_verify: u32,
    turns_with_no_progress: u32,
}

impl TaskEnforcer {
    pub fn new(store: TaskStore, verify_timeout: Duration) -> Self {
        Self {
            store,
            verify_timeout,
            productive_since_verify: 0,
            turns_with_no_progress: 0,
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Run the enforcement rules at the end of a turn.
    pub async fn after_turn(&mut self, class: TurnClass) -> Result<TaskVerdict> {
        // always reload; the agent may have edited the document
        let Some(mut task) = self.store.load().await else {
            return Ok(TaskVerdict::NoTask);
        };

        match task.status {
            TaskStatus::Completed => return self.handle_claimed_completion(task).await,
            TaskStatus::Stopped => {
                let reason = task
                    .completion_reason
                    .clone()
                    .unwrap_or_else(|| "stopped".to_string());
                return Ok(TaskVerdict::Stopped(task, reason));
            }
            TaskStatus::Running => {}
        }

        task.record_turn();

        match class {
            TurnClass::Idle | TurnClass::Empty => self.turns_with_no_progress += 1,
            TurnClass::Productive | TurnClass::Ok => self.turns_with_no_progress = 0,
            TurnClass::Error => {}
        }

        // periodic verification on productive cadence
        if class == TurnClass::Productive {
            self.productive_since_verify += 1;
            if self.productive_since_verify >= PERIODIC_VERIFY_EVERY
                && task.goal.verify_command.is_some()
            {
                self.productive_since_verify = 0;
                if let (true, metric) = self.verification_passes(&task).await? {
                    return self.finalize_completion(task, metric, "verified").await;
                }
            }
        }

        // limits
        if self.turns_with_no_progress >= task.limits.max_idle_turns {
            task.stop("idle_timeout");
        } else if let Some(hours) = task.limits.max_duration_hours {
            if task.elapsed(Utc::now()) >= chrono::Duration::hours(i64::from(hours)) {
                task.stop("time_limit");
            }
        }
        if task.status == TaskStatus::Running {
            if let Some(max_turns) = task.limits.max_turns {
                if task.progress.turns_completed >= max_turns {
                    task.stop("turn_limit");
                }
            }
        }

        self.store.save(&task).await?;

        if task.status == TaskStatus::Stopped {
            let reason = task
                .completion_reason
                .clone()
                .unwrap_or_else(|| "stopped".to_string());
            info!(task = %task.id, reason = %reason, "task stopped by limit");
            return Ok(TaskVerdict::Stopped(task, reason));
        }
        Ok(TaskVerdict::Running(task))
    }

    /// The agent marked the task completed; verify when a command exists.
    async fn handle_claimed_completion(&mut self, mut task: Task) -> Result<TaskVerdict> {
        if task.goal.verify_command.is_none() {
            return self.finalize_completion(task, None, "agent_marked").await;
        }

        let (passed, metric) = self.verification_passes(&task).await?;
        if passed {
            self.finalize_completion(task, metric, "verified").await
        } else {
            // revert; the next prompt notes the failed verification
            task.status = TaskStatus::Running;
            task.completed_at = None;
            task.completion_reason = None;
            self.store.save(&task).await?;
            let note = match metric {
                Some(value) => format!(
                    "completion verification failed: measured {value}, goal not met"
                ),
                None => "completion verification failed: verify command did not produce a metric"
                    .to_string(),
            };
            warn!(task = %task.id, note = %note, "claimed completion rejected");
            Ok(TaskVerdict::VerifyFailed(task, note))
        }
    }

    async fn finalize_completion(
        &mut self,
        mut task: Task,
        metric: Option<f64>,
        reason: &str,
    ) -> Result<TaskVerdict> {
        if let Some(value) = metric {
            task.progress.latest_metric = Some(value);
        }
        task.complete(reason);
        self.store.save(&task).await?;
        self.store.archive_memory(&task.id).await?;
        info!(task = %task.id, reason = %reason, "task completed");
        Ok(TaskVerdict::Completed(task))
    }

    /// Run the verify command and compare its numeric stdout to the goal.
    ///
    /// With no target value configured, a zero exit passes.
    async fn verification_passes(&self, task: &Task) -> Result<(bool, Option<f64>)> {
        let Some(command) = task.goal.verify_command.as_deref() else {
            return Ok((false, None));
        };

        let run = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.store.workspace)
            .output();
        let output = tokio::time::timeout(self.verify_timeout, run)
            .await
            .map_err(|_| SupervisorError::Verify(format!("'{command}' timed out")))?
            .map_err(|e| SupervisorError::Verify(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metric = parse_metric(&stdout);

        let passed = match (task.goal.target_value, task.goal.direction, metric) {
            (Some(target), Some(direction), Some(value)) => direction.satisfied(value, target),
            (Some(_), _, None) => false,
            _ => output.status.success(),
        };
        Ok((passed, metric))
    }
}

/// Last parseable number in stdout
fn parse_metric(stdout: &str) -> Option<f64> {
    stdout
        .split_whitespace()
        .rev()
        .find_map(|token| token.parse::<f64>().ok())
}
