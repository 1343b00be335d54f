//! Retry policy for transient driver failures (§4.6, §7).
//!
//! Grounded in the teacher's `convenient-bitbake::executor::retry` module:
//! a fixed retry budget, exponential backoff with a cap, and per-error-kind
//! eligibility rather than a blanket "retry everything" policy.

use std::time::Duration;

/// The error kinds the core distinguishes (§7), enough detail for retry
/// eligibility classification without duplicating each crate's own error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed target input — fatal at startup, never retried here.
    Parse,
    /// Graph invariant violation — fatal to the containing build.
    Graph,
    /// Cache I/O or corruption.
    Cache,
    /// The language driver reported failure.
    Driver,
    /// A sandbox resource-limit or policy violation.
    Sandbox,
    /// Remote cache unreachable, auth failure, or blob corruption.
    Remote,
    /// Shutdown or upstream failure cascade.
    Cancelled,
}

/// Retry policy: a bounded number of attempts with exponential backoff,
/// subject to the idempotency precondition that the action is hermetic
/// (§4.6 — only sandboxed actions with fully declared inputs/outputs are
/// safe to retry blindly).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts including the first (non-retry) one.
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Backoff ceiling, never exceeded regardless of attempt number.
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff after each failed retry.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Fail fast: never retry.
    #[must_use]
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }

    /// Whether `kind` is ever eligible for retry, independent of attempt
    /// count. Compile errors and policy violations are never transient;
    /// driver/remote failures might be.
    #[must_use]
    pub fn is_retryable_kind(kind: ErrorKind) -> bool {
        matches!(kind, ErrorKind::Driver | ErrorKind::Remote)
    }

    /// Whether `hermetic` (the action was fully sandboxed with declared
    /// inputs/outputs) and `kind`/`attempt` together justify one more try.
    #[must_use]
    pub fn should_retry(&self, kind: ErrorKind, hermetic: bool, attempt: u32) -> bool {
        hermetic && Self::is_retryable_kind(kind) && attempt + 1 < self.max_attempts
    }

    /// Backoff duration before retry number `attempt` (0-indexed, so
    /// `attempt == 0` is the delay before the *first* retry).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_errors_are_never_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(ErrorKind::Sandbox, true, 0));
    }

    #[test]
    fn non_hermetic_actions_are_never_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(ErrorKind::Driver, false, 0));
    }

    #[test]
    fn driver_errors_retry_up_to_the_attempt_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(ErrorKind::Driver, true, 0));
        assert!(policy.should_retry(ErrorKind::Driver, true, 1));
        assert!(!policy.should_retry(ErrorKind::Driver, true, 2));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        assert!(policy.backoff_for(1) > policy.backoff_for(0));
        assert!(policy.backoff_for(20) <= policy.max_backoff);
    }

    #[test]
    fn no_retry_policy_never_retries() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(ErrorKind::Driver, true, 0));
    }
}
