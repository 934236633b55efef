//! Consecutive-failure accounting for the outer loop.

use tracing::warn;

use crate::core::types::IterationOutcome;

/// What the loop should do after recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Continue,
    /// Stop the loop and exit with this code.
    Abort(i32),
}

/// Failure counter owned by the loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    consecutive_failures: u32,
    quit_threshold: u32,
    continue_on_timeout: bool,
}

impl RetryPolicy {
    /// `quit_threshold = 0` never aborts on repeated failures.
    pub fn new(quit_threshold: u32, continue_on_timeout: bool) -> Self {
        Self {
            consecutive_failures: 0,
            quit_threshold,
            continue_on_timeout,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record an outcome and stamp the updated counter onto it.
    ///
    /// Rate-limited outcomes must not be passed here.
    pub fn record(&mut self, outcome: &mut IterationOutcome) -> RetryDecision {
        if outcome.is_success() {
            self.consecutive_failures = 0;
            outcome.consecutive_failures = 0;
            return RetryDecision::Continue;
        }

        self.consecutive_failures += 1;
        outcome.consecutive_failures = self.consecutive_failures;
        warn!(
            status = %outcome.status,
            exit_code = outcome.exit_code,
            consecutive = self.consecutive_failures,
            threshold = self.quit_threshold,
            "iteration failed"
        );

        if outcome.status.is_timeout() && !self.continue_on_timeout {
            return RetryDecision::Abort(outcome.exit_code);
        }
        if self.quit_threshold > 0 && self.consecutive_failures >= self.quit_threshold {
            return RetryDecision::Abort(outcome.exit_code);
        }
        RetryDecision::Continue
    }
}
