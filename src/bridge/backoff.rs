//! Reconnect backoff policy.
//!
//! Exponential, capped, with a small positive jitter. The state is a plain
//! value owned by the reconnect loop and reassigned on every attempt.

use std::time::Duration;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Upper bound on the jitter fraction added to each wait.
pub const MAX_JITTER: f64 = 0.1;

// ─── State ───────────────────────────────────────────────────────────────────

/// Backoff state carried across sessions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffState {
    /// Number of failed sessions so far.
    pub attempt_count: u32,
    /// Base delay used for the next wait.
    pub current_delay: Duration,
}

impl BackoffState {
    pub fn new(initial_delay: Duration, attempt_count: u32) -> Self {
        Self {
            attempt_count,
            current_delay: initial_delay,
        }
    }

    /// Count one more failed session.
    pub fn record_failure(self) -> Self {
        Self {
            attempt_count: self.attempt_count.saturating_add(1),
            ..self
        }
    }
}

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Configured `(initial, max)` backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Fresh state for a run, starting at `attempt_count`.
    pub fn initial_state(&self, attempt_count: u32) -> BackoffState {
        BackoffState::new(self.initial.min(self.max), attempt_count)
    }

    /// Compute the wait before the next attempt, with random jitter.
    pub fn next_delay(&self, state: BackoffState) -> (Duration, BackoffState) {
        let jitter = rand::random::<f64>() * MAX_JITTER;
        self.next_delay_with_jitter(state, jitter)
    }

    /// Compute the wait before the next attempt with an explicit jitter
    /// fraction, clamped to `0..=MAX_JITTER`.
    ///
    /// No wait before the very first attempt. Otherwise the wait is the
    /// capped current delay scaled by `1 + jitter`, and the returned state
    /// carries the doubled (capped) delay for the attempt after.
    pub fn next_delay_with_jitter(
        &self,
        state: BackoffState,
        jitter: f64,
    ) -> (Duration, BackoffState) {
        if state.attempt_count == 0 {
            return (Duration::ZERO, state);
        }

        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, MAX_JITTER)
        } else {
            0.0
        };
        let base = state.current_delay.min(self.max);
        let wait = base.mul_f64(1.0 + jitter);

        let next = BackoffState {
            attempt_count: state.attempt_count,
            current_delay: base.saturating_mul(2).min(self.max),
        };
        (wait, next)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
