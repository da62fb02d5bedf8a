//! Prompt assembly for the turn driver.
//!
//! Three shapes: the full context prompt (first turn and escalations), the
//! lighter continuation prompt, and the recovery directive with live
//! system state.

use drover_spec::{Directive, Question, Task};

use crate::metrics::PromptKind;

/// Opening line of every full context prompt. Escalated full prompts
/// start with the exact same line.
pub const FULL_PROMPT_OPENING: &str =
    "You are an autonomous coding agent resuming work on this project.";

/// Marker block of the recovery directive.
pub const RECOVERY_MARKER: &str = "RECOVERY CHECK";

/// Everything a prompt can draw from
#[derive(Debug, Default)]
pub struct PromptContext {
    pub project: String,
    pub short_memory: String,
    pub long_memory: String,
    pub plan: String,
    pub processes: String,
    pub task: Option<Task>,
    pub directives: Vec<Directive>,
    /// Questions answered since the last prompt
    pub answered: Vec<Question>,
    /// Questions still awaiting an answer
    pub pending: Vec<Question>,
    /// One-line notices (failed verification, limit warnings)
    pub notes: Vec<String>,
    pub memory_reminder: bool,
    /// Live system state, present only for recovery prompts
    pub recovery_snapshot: Option<String>,
    /// Outputs of the task's progress commands
    pub progress_reports: Vec<(String, String)>,
}

pub fn build(kind: PromptKind, ctx: &PromptContext) -> String {
    match kind {
        PromptKind::Full => full_prompt(ctx),
        PromptKind::Continuation => continuation_prompt(ctx),
        PromptKind::Recovery => recovery_prompt(ctx),
    }
}

fn full_prompt(ctx: &PromptContext) -> String {
    let mut out = String::new();
    out.push_str(FULL_PROMPT_OPENING);
    out.push('\n');

    if let Some(prepend) = ctx.task.as_ref().and_then(|t| t.context.prompt_prepend.as_deref()) {
        out.push('\n');
        out.push_str(prepend);
        out.push('\n');
    }

    push_section(&mut out, "Project", &ctx.project);
    push_section(&mut out, "Short-term memory", &ctx.short_memory);
    push_section(&mut out, "Long-term memory", &ctx.long_memory);
    push_section(&mut out, "Plan", &ctx.plan);
    push_section(&mut out, "Running processes", &ctx.processes);

    push_task(&mut out, ctx);
    push_directives(&mut out, &ctx.directives);
    push_questions(&mut out, ctx);
    push_notes(&mut out, ctx);

    out.push_str(
        "\n## Instructions\n\
         Review the state above, then continue making concrete progress \
         toward the task goal. Use your tools; do not merely summarize. \
         Update SHORT_TERM_MEMORY.md with what you did and plan.md with \
         what comes next. Record any questions for the operator in the \
         task document.\n",
    );

    if let Some(append) = ctx.task.as_ref().and_then(|t| t.context.prompt_append.as_deref()) {
        out.push('\n');
        out.push_str(append);
        out.push('\n');
    }
    out
}

fn continuation_prompt(ctx: &PromptContext) -> String {
    let mut out = String::new();
    out.push_str("Continue working on the task. Status update follows.\n");

    push_section(&mut out, "Running processes", &ctx.processes);

    if let Some(task) = &ctx.task {
        push_section(
            &mut out,
            "Progress",
            &format!(
                "{} turns completed. {}",
                task.progress.turns_completed, task.progress.summary
            ),
        );
    }

    for (command, output) in &ctx.progress_reports {
        push_section(&mut out, &format!("Output of `{command}`"), output);
    }

    push_questions(&mut out, ctx);

    if !ctx.directives.is_empty() {
        let compact: Vec<String> = ctx
            .directives
            .iter()
            .map(|d| format!("- {}", d.text))
            .collect();
        push_section(&mut out, "Operator directives", &compact.join("\n"));
    }

    push_notes(&mut out, ctx);

    if ctx.memory_reminder {
        out.push_str(
            "\nIMPORTANT: your memory files have not changed for several \
             productive turns. Update SHORT_TERM_MEMORY.md and \
             LONG_TERM_MEMORY.md now so progress is not lost.\n",
        );
    }
    out
}

fn recovery_prompt(ctx: &PromptContext) -> String {
    let mut out = String::new();
    out.push_str("## ");
    out.push_str(RECOVERY_MARKER);
    out.push_str(
        "\nRepeated turns have produced no output and no tool use. \
         The live system state below is ground truth. Inspect it, decide \
         what is wrong, and TAKE AN ACTION with your tools this turn.\n\n",
    );

    if let Some(snapshot) = &ctx.recovery_snapshot {
        out.push_str(snapshot);
        out.push('\n');
    }

    out.push('\n');
    out.push_str(&full_prompt(ctx));
    out
}

fn push_section(out: &mut String, title: &str, body: &str) {
    if body.is_empty() {
        return;
    }
    out.push_str("\n## ");
    out.push_str(title);
    out.push('\n');
    out.push_str(body);
    out.push('\n');
}

fn push_task(out: &mut String, ctx: &PromptContext) {
    let Some(task) = &ctx.task else { return };
    let mut body = format!("{}: {}\n\nGoal: {}", task.name, task.description, task.goal.description);
    if let Some(command) = &task.goal.verify_command {
        body.push_str(&format!("\nVerification: `{command}`"));
        if let (Some(target), Some(direction)) = (task.goal.target_value, task.goal.direction) {
            body.push_str(&format!(" (target {direction:?} {target})"));
        }
    }
    body.push_str(&format!(
        "\nProgress: {} turns completed",
        task.progress.turns_completed
    ));
    if let Some(metric) = task.progress.latest_metric {
        body.push_str(&format!(", latest metric {metric}"));
    }
    if !task.progress.summary.is_empty() {
        body.push_str(&format!("\nSummary: {}", task.progress.summary));
    }
    push_section(out, "Task", &body);
}

fn push_directives(out: &mut String, directives: &[Directive]) {
    if directives.is_empty() {
        return;
    }
    let listed: Vec<String> = directives.iter().map(|d| format!("- {}", d.text)).collect();
    push_section(out, "Operator directives", &listed.join("\n"));
}

fn push_questions(out: &mut String, ctx: &PromptContext) {
    if !ctx.answered.is_empty() {
        let answers: Vec<String> = ctx
            .answered
            .iter()
            .map(|q| {
                format!(
                    "Q: {}\nA: {}",
                    q.text,
                    q.answer.as_deref().unwrap_or_default()
                )
            })
            .collect();
        push_section(out, "Human Responses", &answers.join("\n\n"));
    }
    if !ctx.pending.is_empty() {
        let pending: Vec<String> = ctx
            .pending
            .iter()
            .map(|q| format!("- [{:?}] {}", q.priority, q.text))
            .collect();
        push_section(out, "Awaiting answers", &pending.join("\n"));
    }
}

fn push_notes(out: &mut String, ctx: &PromptContext) {
    if ctx.notes.is_empty() {
        return;
    }
    let notes: Vec<String> = ctx.notes.iter().map(|n| format!("- {n}")).collect();
    push_section(out, "Notices", &notes.join("\n"));
}
