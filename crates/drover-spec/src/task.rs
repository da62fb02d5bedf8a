//! Task document: the structured work goal the supervisor drives against.
//!
//! The document lives in the sandbox workspace as `.task.json` and is
//! treated as last-writer-wins between the agent and the supervisor; the
//! supervisor always reloads before comparing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default idle-turn budget before a running task is stopped
pub const DEFAULT_MAX_IDLE_TURNS: u32 = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Completion is verified by a numeric metric
    Measurable,
    /// Completion is judged by the agent / operator
    #[default]
    Subjective,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Stopped,
    Completed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Stopped | TaskStatus::Completed)
    }
}

/// Which side of the target value counts as success
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GoalDirection {
    Above,
    Below,
}

impl GoalDirection {
    /// Whether `metric` satisfies the goal against `target`
    pub fn satisfied(&self, metric: f64, target: f64) -> bool {
        match self {
            GoalDirection::Above => metric >= target,
            GoalDirection::Below => metric <= target,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskGoal {
    pub description: String,
    /// Shell command whose numeric stdout verifies completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<GoalDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskLimits {
    #[serde(default = "default_max_idle_turns")]
    pub max_idle_turns: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_hours: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
}

fn default_max_idle_turns() -> u32 {
    DEFAULT_MAX_IDLE_TURNS
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            max_idle_turns: DEFAULT_MAX_IDLE_TURNS,
            max_duration_hours: None,
            max_turns: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskProgress {
    #[serde(default)]
    pub turns_completed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_metric: Option<f64>,
    #[serde(default)]
    pub summary: String,
}

/// Prompt shaping and monitoring hooks supplied at task creation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_prepend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_append: Option<String>,
    /// Process-name patterns the supervisor reports on each turn
    #[serde(default)]
    pub process_monitor: Vec<String>,
    /// Commands whose output is summarized into progress reports
    #[serde(default)]
    pub progress_commands: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionPriority {
    #[default]
    Question,
    /// The agent cannot make progress until answered
    Blocking,
}

/// A question the agent asked the operator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub priority: QuestionPriority,
    pub asked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl Question {
    pub fn is_answered(&self) -> bool {
        self.answered_at.is_some()
    }

    /// Record an answer. `answered_at` and `answer` are always set together.
    pub fn record_answer(&mut self, answer: impl Into<String>) {
        self.answer = Some(answer.into());
        self.answered_at = Some(Utc::now());
    }
}

/// The task document persisted at `/workspace/.task.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub goal: TaskGoal,
    #[serde(default)]
    pub limits: TaskLimits,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_reason: Option<String>,
    #[serde(default)]
    pub progress: TaskProgress,
    #[serde(default)]
    pub context: TaskContext,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Task {
    /// Create a fresh running task
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            task_type: TaskType::default(),
            goal: TaskGoal::default(),
            limits: TaskLimits::default(),
            status: TaskStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            completion_reason: None,
            progress: TaskProgress::default(),
            context: TaskContext::default(),
            questions: Vec::new(),
        }
    }

    /// Record one completed turn. `turns_completed` is monotonic.
    pub fn record_turn(&mut self) {
        self.progress.turns_completed += 1;
        self.progress.last_active_at = Some(Utc::now());
    }

    /// Stop the task with a reason (idle_timeout, time_limit, turn_limit, operator)
    pub fn stop(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Stopped;
        self.completed_at = Some(Utc::now());
        self.completion_reason = Some(reason.into());
    }

    /// Mark the task completed
    pub fn complete(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.completion_reason = Some(reason.into());
    }

    /// Transition a terminal task back to running. The id, accumulated
    /// progress, and question history are preserved.
    pub fn resume(&mut self) {
        self.status = TaskStatus::Running;
        self.completed_at = None;
        self.completion_reason = None;
        self.progress.last_active_at = Some(Utc::now());
    }

    /// Unanswered blocking questions, oldest first
    pub fn blocking_unanswered(&self) -> Vec<&Question> {
        self.questions
            .iter()
            .filter(|q| q.priority == QuestionPriority::Blocking && !q.is_answered())
            .collect()
    }

    pub fn find_question_mut(&mut self, id: &str) -> Option<&mut Question> {
        self.questions.iter_mut().find(|q| q.id == id)
    }

    /// How long the task has been running
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.started_at
    }
}
