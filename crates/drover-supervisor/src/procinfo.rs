//! Live system snapshots for prompts and recovery checks

use std::time::Duration;

use tokio::process::Command;

/// Bound on any snapshot command
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a shell command and return trimmed stdout, empty on any failure.
async fn capture(command: &str) -> String {
    let run = Command::new("sh").arg("-c").arg(command).output();
    match tokio::time::timeout(SNAPSHOT_TIMEOUT, run).await {
        Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout).trim().to_string(),
        _ => String::new(),
    }
}

/// Short summary of running processes, filtered to the watch patterns
/// when any are configured.
pub async fn process_summary(patterns: &[String]) -> String {
    let listing = capture("ps -eo pid,etime,pcpu,pmem,comm --no-headers 2>/dev/null | head -40").await;
    if listing.is_empty() {
        return "process listing unavailable".to_string();
    }
    if patterns.is_empty() {
        return listing;
    }

    let matched: Vec<&str> = listing
        .lines()
        .filter(|line| patterns.iter().any(|p| line.contains(p.as_str())))
        .collect();
    if matched.is_empty() {
        format!("no watched processes running (patterns: {})", patterns.join(", "))
    } else {
        matched.join("\n")
    }
}

/// Full live-state block for the recovery directive: process listing,
/// disk usage, and a memory snapshot.
pub async fn recovery_snapshot() -> String {
    let ps = capture("ps aux --sort=-pcpu 2>/dev/null | head -20").await;
    let df = capture("df -h 2>/dev/null").await;
    let mem = capture("free -m 2>/dev/null").await;

    format!(
        "## Processes\n{}\n\n## Disk\n{}\n\n## Memory\n{}",
        non_empty(ps),
        non_empty(df),
        non_empty(mem)
    )
}

/// Outputs of the task's configured progress commands, labeled.
pub async fn progress_reports(commands: &[String]) -> Vec<(String, String)> {
    let mut reports = Vec::with_capacity(commands.len());
    for command in commands {
        let output = capture(command).await;
        reports.push((command.clone(), non_empty(output)));
    }
    reports
}

fn non_empty(s: String) -> String {
    if s.is_empty() {
        "(unavailable)".to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_returns_stdout() {
        let out = capture("echo snapshot-works").await;
        assert_eq!(out, "snapshot-works");
    }

    #[tokio::test]
    async fn capture_failure_is_empty() {
        let out = capture("exit 3").await;
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn recovery_snapshot_has_sections() {
        let snapshot = recovery_snapshot().await;
        assert!(snapshot.contains("## Processes"));
        assert!(snapshot.contains("## Disk"));
        assert!(snapshot.contains("## Memory"));
    }

    #[tokio::test]
    async fn progress_reports_label_commands() {
        let reports = progress_reports(&["echo 42".to_string()]).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "echo 42");
        assert_eq!(reports[0].1, "42");
    }
}
