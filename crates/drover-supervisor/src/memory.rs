//! Memory-file change tracking
//!
//! The supervisor hashes the short- and long-term memory files each turn;
//! after three productive/ok turns without a change it appends a strong
//! reminder to the next prompt.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Productive turns without a memory change before the reminder fires
const REMINDER_AFTER: u32 = 3;

pub const SHORT_TERM_FILE: &str = "SHORT_TERM_MEMORY.md";
pub const LONG_TERM_FILE: &str = "LONG_TERM_MEMORY.md";
pub const PLAN_FILE: &str = "plan.md";

#[derive(Debug)]
pub struct MemoryTracker {
    workspace: PathBuf,
    last_hash: Option<[u8; 32]>,
    unchanged_turns: u32,
}

impl MemoryTracker {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            last_hash: None,
            unchanged_turns: 0,
        }
    }

    fn current_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for file in [SHORT_TERM_FILE, LONG_TERM_FILE] {
            let content = std::fs::read(self.workspace.join(file)).unwrap_or_default();
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(&content);
        }
        hasher.finalize().into()
    }

    /// Record one productive/ok turn. Returns true when the reminder
    /// should be appended to the next prompt.
    pub fn observe_turn(&mut self) -> bool {
        let hash = self.current_hash();
        if self.last_hash == Some(hash) {
            self.unchanged_turns += 1;
        } else {
            self.last_hash = Some(hash);
            self.unchanged_turns = 0;
        }
        self.unchanged_turns >= REMINDER_AFTER
    }

    /// Reset after the reminder has been delivered.
    pub fn reminder_sent(&mut self) {
        self.unchanged_turns = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reminder_after_three_unchanged_turns() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SHORT_TERM_FILE), "notes v1").unwrap();
        std::fs::write(dir.path().join(LONG_TERM_FILE), "long v1").unwrap();

        let mut tracker = MemoryTracker::new(dir.path());
        assert!(!tracker.observe_turn()); // baseline
        assert!(!tracker.observe_turn()); // unchanged x1
        assert!(!tracker.observe_turn()); // unchanged x2
        assert!(tracker.observe_turn()); // unchanged x3 -> remind
    }

    #[test]
    fn change_resets_counter() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SHORT_TERM_FILE), "notes v1").unwrap();

        let mut tracker = MemoryTracker::new(dir.path());
        tracker.observe_turn();
        tracker.observe_turn();
        tracker.observe_turn();

        std::fs::write(dir.path().join(SHORT_TERM_FILE), "notes v2").unwrap();
        assert!(!tracker.observe_turn());
        assert!(!tracker.observe_turn());
    }

    #[test]
    fn reminder_sent_resets() {
        let dir = tempdir().unwrap();
        let mut tracker = MemoryTracker::new(dir.path());
        tracker.observe_turn();
        tracker.observe_turn();
        tracker.observe_turn();
        assert!(tracker.observe_turn());
        tracker.reminder_sent();
        assert!(!tracker.observe_turn());
    }

    #[test]
    fn missing_files_hash_stably() {
        let dir = tempdir().unwrap();
        let mut tracker = MemoryTracker::new(dir.path());
        assert!(!tracker.observe_turn());
        assert!(!tracker.observe_turn());
    }
}
