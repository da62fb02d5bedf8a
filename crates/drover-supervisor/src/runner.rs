//! The supervisor state machine.
//!
//! One cooperative task drives `INIT -> PROMPTING -> WAITING -> DELAY`
//! with the orthogonal `PAUSED`, `NEEDS_INPUT`, and `COMPLETED` states.
//! Gateway frames arrive on a channel; timers are a single cancellable
//! deadline whose meaning depends on the current phase. The gateway is
//! the only source of truth for engine and presence state.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use drover_core::SupervisorTimings;
use drover_spec::{Directive, Question, ServerFrame, SupervisorAction, Task, TaskStatus};

use crate::error::{Result, SupervisorError};
use crate::memory::{MemoryTracker, LONG_TERM_FILE, PLAN_FILE, SHORT_TERM_FILE};
use crate::metrics::{
    classify, escalation, next_delay, PromptKind, TurnClass, TurnMetrics, ESCALATE_REINIT_AT,
};
use crate::procinfo;
use crate::prompt::{self, PromptContext};
use crate::taskdoc::{TaskEnforcer, TaskVerdict};

/// Why the runner returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exit the process
    Stop,
    /// Exit so the watchdog respawns a fresh supervisor
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No prompt sent yet; prompt at the first productive opportunity
    Boot,
    /// A turn is in flight
    Waiting,
    /// Scheduled delay before the next prompt
    Delay,
    /// Humans attached (or operator pause)
    Paused,
    /// Humans just left; waiting out the settle window
    Settling,
    /// Blocking questions unanswered; polling the task document
    NeedsInput,
    /// Task is terminal; polling for an external resume
    Completed,
}

pub struct Supervisor {
    project: String,
    workspace: PathBuf,
    timings: SupervisorTimings,
    frames: mpsc::UnboundedReceiver<ServerFrame>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: watch::Receiver<bool>,

    enforcer: TaskEnforcer,
    memory: MemoryTracker,

    phase: Phase,
    deadline: Option<Instant>,
    /// Delay elapsed but conditions were not met yet
    prompt_due: bool,

    // gateway truth
    oc_connected: bool,
    agent_busy: bool,
    humans: usize,
    manual_pause: bool,

    first_prompt_sent: bool,
    next_prompt_kind: PromptKind,
    idle_streak: u32,
    empty_streak: u32,
    turn: TurnMetrics,

    answered_seen: HashSet<String>,
    notes: Vec<String>,
    memory_reminder: bool,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project: String,
        workspace: PathBuf,
        timings: SupervisorTimings,
        frames: mpsc::UnboundedReceiver<ServerFrame>,
        outbound: mpsc::UnboundedSender<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let enforcer = TaskEnforcer::new(
            crate::taskdoc::TaskStore::new(&workspace),
            Duration::from_secs(timings.verify_timeout_secs),
        );
        let memory = MemoryTracker::new(&workspace);
        Self {
            project,
            workspace,
            timings,
            frames,
            outbound,
            shutdown,
            enforcer,
            memory,
            phase: Phase::Boot,
            deadline: None,
            prompt_due: true,
            oc_connected: false,
            agent_busy: false,
            humans: 0,
            manual_pause: false,
            first_prompt_sent: false,
            next_prompt_kind: PromptKind::Full,
            idle_streak: 0,
            empty_streak: 0,
            turn: TurnMetrics::default(),
            answered_seen: HashSet::new(),
            notes: Vec::new(),
            memory_reminder: false,
        }
    }

    /// Run until stop/restart is requested.
    pub async fn run(mut self) -> Result<Outcome> {
        info!(project = %self.project, "supervisor running");
        loop {
            let deadline = self
                .deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("supervisor shutting down");
                        return Ok(Outcome::Stop);
                    }
                }

                frame = self.frames.recv() => {
                    let Some(frame) = frame else {
                        return Err(SupervisorError::Gateway(
                            "gateway client channel closed".to_string(),
                        ));
                    };
                    if let Some(outcome) = self.on_frame(frame).await? {
                        return Ok(outcome);
                    }
                }

                _ = tokio::time::sleep_until(deadline), if self.deadline.is_some() => {
                    self.deadline = None;
                    self.on_deadline().await?;
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: ServerFrame) -> Result<Option<Outcome>> {
        match frame {
            ServerFrame::Status {
                agent_busy,
                human_count,
                oc_connected,
                ..
            } => {
                self.oc_connected = oc_connected;
                self.agent_busy = agent_busy;
                self.on_presence(human_count);
                self.try_prompt().await?;
            }
            ServerFrame::ClientChange { humans, .. } => {
                self.on_presence(humans);
            }
            ServerFrame::TextDelta { text } => {
                if self.phase == Phase::Waiting {
                    self.turn.record_text(&text);
                }
            }
            ServerFrame::ToolStart { .. } => {
                if self.phase == Phase::Waiting {
                    self.turn.record_tool_start();
                }
            }
            ServerFrame::ToolUse { .. } | ServerFrame::ToolResult { .. } => {
                if self.phase == Phase::Waiting {
                    self.turn.record_other_event();
                }
            }
            ServerFrame::Done => {
                self.agent_busy = false;
                if self.phase == Phase::Waiting {
                    self.finish_turn(false).await?;
                }
            }
            ServerFrame::Error { message, .. } => {
                self.agent_busy = false;
                if self.phase == Phase::Waiting {
                    debug!(message = %message, "turn ended with error");
                    self.finish_turn(true).await?;
                }
            }
            ServerFrame::SupervisorControl { action } => {
                return self.on_control(action).await;
            }
            ServerFrame::History { .. } | ServerFrame::TaskStatus { .. } => {}
        }
        Ok(None)
    }

    async fn on_control(&mut self, action: SupervisorAction) -> Result<Option<Outcome>> {
        info!(action = %action.as_str(), "supervisor control received");
        match action {
            SupervisorAction::Pause => {
                self.manual_pause = true;
                self.cancel_pending();
                self.phase = Phase::Paused;
                Ok(None)
            }
            SupervisorAction::Resume => {
                self.manual_pause = false;
                if self.humans == 0 {
                    self.resume_to_appropriate_state().await?;
                }
                Ok(None)
            }
            SupervisorAction::Stop => Ok(Some(Outcome::Stop)),
            SupervisorAction::Restart => Ok(Some(Outcome::Restart)),
        }
    }

    /// Presence transitions. A human joining preempts any pending delay;
    /// all humans leaving starts the settle window.
    fn on_presence(&mut self, humans: usize) {
        let before = self.humans;
        self.humans = humans;

        if humans > 0 && before == 0 {
            info!(humans, "humans attached, pausing");
            self.cancel_pending();
            if self.phase != Phase::Waiting {
                self.phase = Phase::Paused;
            }
        } else if humans == 0 && before > 0 && !self.manual_pause {
            if self.phase == Phase::Paused {
                debug!("humans left, settling");
                self.phase = Phase::Settling;
                self.deadline =
                    Some(Instant::now() + Duration::from_secs(self.timings.settle_delay_secs));
            }
        }
    }

    fn cancel_pending(&mut self) {
        if self.phase == Phase::Delay || self.phase == Phase::Settling {
            self.deadline = None;
            self.prompt_due = false;
        }
    }

    async fn on_deadline(&mut self) -> Result<()> {
        match self.phase {
            Phase::Waiting => {
                // turn timeout: the agent is assumed to have been working
                debug!("turn timed out, classifying productive");
                self.finish_turn_with(TurnClass::Productive).await?;
            }
            Phase::Delay | Phase::Boot => {
                self.prompt_due = true;
                self.try_prompt().await?;
            }
            Phase::Settling => {
                self.resume_to_appropriate_state().await?;
            }
            Phase::NeedsInput => {
                self.poll_needs_input().await?;
            }
            Phase::Completed => {
                self.poll_completed().await?;
            }
            Phase::Paused => {}
        }
        Ok(())
    }

    /// After the settle window (or an operator resume), pick the state the
    /// current data calls for.
    async fn resume_to_appropriate_state(&mut self) -> Result<()> {
        let task = self.enforcer.store().load().await;
        match task {
            Some(task) if task.status.is_terminal() => self.enter_completed(),
            Some(task) if !task.blocking_unanswered().is_empty() => self.enter_needs_input(),
            _ => {
                self.phase = Phase::Delay;
                self.prompt_due = true;
                self.try_prompt().await?;
            }
        }
        Ok(())
    }

    fn enter_completed(&mut self) {
        info!("task terminal, supervisor idle");
        self.phase = Phase::Completed;
        self.deadline =
            Some(Instant::now() + Duration::from_secs(self.timings.needs_input_poll_secs));
    }

    fn enter_needs_input(&mut self) {
        info!("blocking questions unanswered, waiting for input");
        self.phase = Phase::NeedsInput;
        self.deadline =
            Some(Instant::now() + Duration::from_secs(self.timings.needs_input_poll_secs));
    }

    async fn poll_needs_input(&mut self) -> Result<()> {
        match self.enforcer.store().load().await {
            Some(task) if task.status != TaskStatus::Running => self.enter_completed(),
            Some(task) if task.blocking_unanswered().is_empty() => {
                info!("blocking questions resolved");
                self.phase = Phase::Delay;
                self.prompt_due = true;
                self.try_prompt().await?;
            }
            Some(_) => {
                self.deadline = Some(
                    Instant::now() + Duration::from_secs(self.timings.needs_input_poll_secs),
                );
            }
            None => {
                self.phase = Phase::Delay;
                self.prompt_due = true;
                self.try_prompt().await?;
            }
        }
        Ok(())
    }

    async fn poll_completed(&mut self) -> Result<()> {
        match self.enforcer.store().load().await {
            Some(task) if task.status == TaskStatus::Running => {
                info!("task resumed externally");
                self.phase = Phase::Delay;
                self.prompt_due = true;
                self.try_prompt().await?;
            }
            _ => {
                self.deadline = Some(
                    Instant::now() + Duration::from_secs(self.timings.needs_input_poll_secs),
                );
            }
        }
        Ok(())
    }

    fn can_prompt(&self) -> bool {
        let phase_allows = matches!(self.phase, Phase::Boot | Phase::Delay) && self.prompt_due;
        phase_allows
            && self.oc_connected
            && !self.agent_busy
            && self.humans == 0
            && !self.manual_pause
    }

    async fn try_prompt(&mut self) -> Result<()> {
        if !self.can_prompt() {
            return Ok(());
        }
        self.send_prompt().await
    }

    /// Assemble and send exactly one prompt, entering WAITING.
    async fn send_prompt(&mut self) -> Result<()> {
        let kind = if self.first_prompt_sent {
            self.next_prompt_kind
        } else {
            PromptKind::Full
        };

        let task = self.enforcer.store().load().await;

        let patterns = task
            .as_ref()
            .map(|t| t.context.process_monitor.clone())
            .unwrap_or_default();
        let processes = procinfo::process_summary(&patterns).await;

        let progress_reports = if kind == PromptKind::Continuation {
            let commands = task
                .as_ref()
                .map(|t| t.context.progress_commands.clone())
                .unwrap_or_default();
            procinfo::progress_reports(&commands).await
        } else {
            Vec::new()
        };

        let recovery_snapshot = if kind == PromptKind::Recovery {
            Some(procinfo::recovery_snapshot().await)
        } else {
            None
        };

        let (answered, pending) = self.split_questions(task.as_ref());

        let context = PromptContext {
            project: self.project.clone(),
            short_memory: self.read_workspace_file(SHORT_TERM_FILE).await,
            long_memory: self.read_workspace_file(LONG_TERM_FILE).await,
            plan: self.read_workspace_file(PLAN_FILE).await,
            processes,
            task,
            directives: self.load_directives().await,
            answered,
            pending,
            notes: std::mem::take(&mut self.notes),
            memory_reminder: self.memory_reminder,
            recovery_snapshot,
            progress_reports,
        };

        let body = prompt::build(kind, &context);

        // one send per PROMPTING -> WAITING transition
        self.outbound
            .send(body)
            .map_err(|_| SupervisorError::Gateway("outbound channel closed".to_string()))?;

        info!(kind = ?kind, "prompt sent");

        if self.memory_reminder {
            self.memory.reminder_sent();
            self.memory_reminder = false;
        }
        for question in &context.answered {
            self.answered_seen.insert(question.id.clone());
        }

        self.first_prompt_sent = true;
        self.prompt_due = false;
        self.turn = TurnMetrics::default();
        self.phase = Phase::Waiting;
        self.deadline =
            Some(Instant::now() + Duration::from_secs(self.timings.turn_timeout_secs));
        Ok(())
    }

    async fn finish_turn(&mut self, errored: bool) -> Result<()> {
        let class = classify(&self.turn, errored);
        self.finish_turn_with(class).await
    }

    /// Close out the current turn: streaks, memory tracking, task
    /// enforcement, escalation, and the next delay.
    async fn finish_turn_with(&mut self, class: TurnClass) -> Result<()> {
        debug!(class = ?class, chars = self.turn.chars, tools = self.turn.tools, "turn finished");
        self.deadline = None;

        self.idle_streak = if class == TurnClass::Idle {
            self.idle_streak + 1
        } else {
            0
        };
        self.empty_streak = if class == TurnClass::Empty {
            self.empty_streak + 1
        } else {
            0
        };

        if matches!(class, TurnClass::Productive | TurnClass::Ok) {
            self.memory_reminder = self.memory.observe_turn();
        }

        let verdict = match self.enforcer.after_turn(class).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "task enforcement failed, continuing");
                TaskVerdict::NoTask
            }
        };

        match verdict {
            TaskVerdict::Completed(_) | TaskVerdict::Stopped(_, _) => {
                self.enter_completed();
                return Ok(());
            }
            TaskVerdict::VerifyFailed(_, note) => {
                self.notes.push(note);
            }
            TaskVerdict::Running(ref task) => {
                if matches!(class, TurnClass::Idle | TurnClass::Empty)
                    && !task.blocking_unanswered().is_empty()
                {
                    self.enter_needs_input();
                    return Ok(());
                }
            }
            TaskVerdict::NoTask => {}
        }

        // empty-turn escalation ladder
        if self.empty_streak >= ESCALATE_REINIT_AT {
            warn!(streak = self.empty_streak, "re-initializing after sustained empty turns");
            self.empty_streak = 0;
            self.idle_streak = 0;
            self.first_prompt_sent = false;
            self.next_prompt_kind = PromptKind::Full;
        } else {
            self.next_prompt_kind = escalation(self.empty_streak);
        }

        if self.humans > 0 || self.manual_pause {
            self.phase = Phase::Paused;
            return Ok(());
        }

        let delay = next_delay(class, self.idle_streak, self.empty_streak, &self.timings);
        debug!(delay_secs = delay.as_secs(), "next prompt scheduled");
        self.phase = Phase::Delay;
        self.prompt_due = false;
        self.deadline = Some(Instant::now() + delay);
        Ok(())
    }

    /// Split the task's questions into newly-answered (not yet surfaced)
    /// and still-pending lists.
    fn split_questions(&self, task: Option<&Task>) -> (Vec<Question>, Vec<Question>) {
        let Some(task) = task else {
            return (Vec::new(), Vec::new());
        };
        let answered = task
            .questions
            .iter()
            .filter(|q| q.is_answered() && !self.answered_seen.contains(&q.id))
            .cloned()
            .collect();
        let pending = task
            .questions
            .iter()
            .filter(|q| !q.is_answered())
            .cloned()
            .collect();
        (answered, pending)
    }

    async fn read_workspace_file(&self, name: &str) -> String {
        tokio::fs::read_to_string(self.workspace.join(name))
            .await
            .unwrap_or_default()
    }

    async fn load_directives(&self) -> Vec<Directive> {
        let path = self.workspace.join(".operator-directives.json");
        let Ok(raw) = tokio::fs::read_to_string(&path).await else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }
}
