//! Sliding-window lockout policy
//!
//! Derives "may attempt" / "locked" from recent failed attempts. The window
//! is trailing and recomputed on every call from the raw attempt timestamps,
//! so a lockout lifts naturally as old failures age out; there is no stored
//! unlock timestamp.
//!
//! Known fairness caveat, kept deliberately: because nothing accumulates
//! beyond the trailing window, a caller pacing failures far enough apart can
//! stay below the threshold indefinitely. A fixed lock-until timestamp would
//! close that gap at the cost of punishing honest retries after a lift.

use crate::types::ValidationAttempt;
use chrono::{DateTime, Duration, Utc};

/// Default maximum failures tolerated in one window
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// Default trailing window in minutes
pub const DEFAULT_WINDOW_MINUTES: i64 = 30;

/// Lockout policy parameters
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    /// Failures tolerated before attempts are rejected
    pub max_failures: u32,

    /// Trailing window over which failures are counted
    pub window: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            window: Duration::minutes(DEFAULT_WINDOW_MINUTES),
        }
    }
}

/// Outcome of a lockout evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutDecision {
    /// Whether another attempt is admitted right now
    pub allowed: bool,

    /// Attempts left before lockout (0 when locked)
    pub remaining: u32,

    /// When the oldest in-window failure ages out and room frees up.
    /// `None` while attempts are still admitted.
    pub window_end: Option<DateTime<Utc>>,
}

impl LockoutPolicy {
    /// Evaluate the policy against a delivery's attempt history.
    ///
    /// Pure read: counts failed attempts whose timestamp falls inside the
    /// trailing window ending at `now`. Successful attempts never count.
    pub fn evaluate(&self, attempts: &[ValidationAttempt], now: DateTime<Utc>) -> LockoutDecision {
        let window_start = now - self.window;

        let mut oldest_failure: Option<DateTime<Utc>> = None;
        let mut failed: u32 = 0;

        for attempt in attempts {
            if attempt.success || attempt.attempted_at <= window_start {
                continue;
            }
            failed += 1;
            match oldest_failure {
                Some(ts) if ts <= attempt.attempted_at => {}
                _ => oldest_failure = Some(attempt.attempted_at),
            }
        }

        let allowed = failed < self.max_failures;
        let remaining = self.max_failures.saturating_sub(failed);

        LockoutDecision {
            allowed,
            remaining,
            window_end: if allowed {
                None
            } else {
                oldest_failure.map(|ts| ts + self.window)
            },
        }
    }
}
