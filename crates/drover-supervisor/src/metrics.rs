//! Turn accounting: metrics, classification, scheduling delays, and the
//! empty-turn escalation ladder.

use std::time::Duration;

use drover_core::SupervisorTimings;

/// Streamed-text threshold below which a tool-less turn counts as idle
const IDLE_CHAR_THRESHOLD: usize = 200;

/// Empty streak at which exponential backoff starts
const EMPTY_BACKOFF_THRESHOLD: u32 = 3;

/// Empty streak that forces a full context prompt
pub const ESCALATE_FULL_AT: u32 = 5;

/// Empty streak that forces a recovery directive
pub const ESCALATE_RECOVERY_AT: u32 = 10;

/// Empty streak that forces full re-initialization
pub const ESCALATE_REINIT_AT: u32 = 20;

/// Counters accumulated over one turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnMetrics {
    /// Characters of streamed text
    pub chars: usize,
    /// Tool invocations observed
    pub tools: u32,
    /// Total events observed
    pub events: u32,
}

impl TurnMetrics {
    pub fn record_text(&mut self, text: &str) {
        self.chars += text.len();
        self.events += 1;
    }

    pub fn record_tool_start(&mut self) {
        self.tools += 1;
        self.events += 1;
    }

    pub fn record_other_event(&mut self) {
        self.events += 1;
    }
}

/// Productivity classification of a finished turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnClass {
    Productive,
    Ok,
    Idle,
    Empty,
    Error,
}

/// Classify a finished turn from its metrics.
///
/// A timed-out turn is classified by the caller as productive (the agent
/// is assumed to have been working); an error event short-circuits to
/// `Error` before metrics are considered.
pub fn classify(metrics: &TurnMetrics, errored: bool) -> TurnClass {
    if errored {
        return TurnClass::Error;
    }
    if metrics.tools >= 1 {
        return TurnClass::Productive;
    }
    if metrics.chars == 0 {
        return TurnClass::Empty;
    }
    if metrics.chars < IDLE_CHAR_THRESHOLD {
        return TurnClass::Idle;
    }
    TurnClass::Ok
}

/// Delay before the next prompt, given the classification and the current
/// streak counters (already incremented for this turn).
pub fn next_delay(
    class: TurnClass,
    idle_streak: u32,
    empty_streak: u32,
    timings: &SupervisorTimings,
) -> Duration {
    let max = Duration::from_secs(timings.max_backoff_secs);
    match class {
        TurnClass::Productive => Duration::from_secs(timings.productive_delay_secs),
        TurnClass::Ok => Duration::from_secs(timings.ok_delay_secs),
        TurnClass::Idle => {
            let scaled = timings.idle_delay_unit_secs.saturating_mul(u64::from(idle_streak.max(1)));
            Duration::from_secs(scaled).min(max)
        }
        TurnClass::Empty => {
            let base = timings.empty_delay_secs;
            if empty_streak < EMPTY_BACKOFF_THRESHOLD {
                Duration::from_secs(base)
            } else {
                let exponent = empty_streak - EMPTY_BACKOFF_THRESHOLD;
                let factor = 2u64.saturating_pow(exponent.min(16));
                Duration::from_secs(base.saturating_mul(factor)).min(max)
            }
        }
        TurnClass::Error => Duration::from_secs(timings.empty_delay_secs),
    }
}

/// What kind of prompt the next turn should use, given the consecutive
/// empty-turn streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Full,
    Continuation,
    Recovery,
}

/// The escalation ladder on consecutive empty turns. At the
/// re-initialization threshold the caller resets counters and treats the
/// next prompt as a fresh start.
pub fn escalation(empty_streak: u32) -> PromptKind {
    if empty_streak >= ESCALATE_RECOVERY_AT {
        PromptKind::Recovery
    } else if empty_streak >= ESCALATE_FULL_AT {
        PromptKind::Full
    } else {
        PromptKind::Continuation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> SupervisorTimings {
        SupervisorTimings::default()
    }

    fn metrics(chars: usize, tools: u32) -> TurnMetrics {
        TurnMetrics {
            chars,
            tools,
            events: (chars > 0) as u32 + tools,
        }
    }

    #[test]
    fn classification_rules() {
        assert_eq!(classify(&metrics(0, 3), false), TurnClass::Productive);
        assert_eq!(classify(&metrics(5000, 1), false), TurnClass::Productive);
        assert_eq!(classify(&metrics(500, 0), false), TurnClass::Ok);
        assert_eq!(classify(&metrics(199, 0), false), TurnClass::Idle);
        assert_eq!(classify(&metrics(0, 0), false), TurnClass::Empty);
        assert_eq!(classify(&metrics(5000, 2), true), TurnClass::Error);
    }

    #[test]
    fn productive_and_ok_delays() {
        let t = timings();
        assert_eq!(
            next_delay(TurnClass::Productive, 0, 0, &t),
            Duration::from_secs(15)
        );
        assert_eq!(next_delay(TurnClass::Ok, 0, 0, &t), Duration::from_secs(30));
    }

    #[test]
    fn idle_delay_scales_and_caps() {
        let t = timings();
        assert_eq!(
            next_delay(TurnClass::Idle, 1, 0, &t),
            Duration::from_secs(300)
        );
        assert_eq!(
            next_delay(TurnClass::Idle, 2, 0, &t),
            Duration::from_secs(600)
        );
        // capped at 10 minutes
        assert_eq!(
            next_delay(TurnClass::Idle, 5, 0, &t),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn empty_backoff_ladder() {
        let t = timings();
        // below the threshold: flat 2 minutes
        assert_eq!(
            next_delay(TurnClass::Empty, 0, 1, &t),
            Duration::from_secs(120)
        );
        assert_eq!(
            next_delay(TurnClass::Empty, 0, 2, &t),
            Duration::from_secs(120)
        );
        // boundary: still 2 minutes (2min * 2^0)
        assert_eq!(
            next_delay(TurnClass::Empty, 0, 3, &t),
            Duration::from_secs(120)
        );
        // then doubling
        assert_eq!(
            next_delay(TurnClass::Empty, 0, 4, &t),
            Duration::from_secs(240)
        );
        assert_eq!(
            next_delay(TurnClass::Empty, 0, 5, &t),
            Duration::from_secs(480)
        );
        // capped at 10 minutes
        assert_eq!(
            next_delay(TurnClass::Empty, 0, 6, &t),
            Duration::from_secs(600)
        );
        assert_eq!(
            next_delay(TurnClass::Empty, 0, 30, &t),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn error_delay() {
        let t = timings();
        assert_eq!(
            next_delay(TurnClass::Error, 0, 0, &t),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn escalation_ladder() {
        assert_eq!(escalation(0), PromptKind::Continuation);
        assert_eq!(escalation(4), PromptKind::Continuation);
        assert_eq!(escalation(5), PromptKind::Full);
        assert_eq!(escalation(9), PromptKind::Full);
        assert_eq!(escalation(10), PromptKind::Recovery);
        assert_eq!(escalation(19), PromptKind::Recovery);
    }

    #[test]
    fn metrics_accumulate() {
        let mut m = TurnMetrics::default();
        m.record_text("hello");
        m.record_tool_start();
        m.record_other_event();
        assert_eq!(m.chars, 5);
        assert_eq!(m.tools, 1);
        assert_eq!(m.events, 3);
    }
}
