//! Bounded retry with a fixed delay between attempts.
//!
//! The executor never rolls anything back between attempts: operations are
//! expected to be safely re-runnable from scratch.

use crate::context::RunContext;
use crate::errors::OperationError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy attached to every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of invocations allowed, including the first. Must be >= 1.
    pub max_attempts: u32,
    /// Pause between two consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// `retries` re-invocations after the first attempt.
    #[must_use]
    pub fn retries(retries: u32, delay: Duration) -> Self {
        Self::new(retries.saturating_add(1), delay)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No attempts left.
    GiveUp,
    /// The failure is permanent.
    NotRetryable,
}

/// Decides what to do after `attempt` (1-based) failed with `error`.
#[must_use]
pub fn should_retry(attempt: u32, policy: &RetryPolicy, error: &OperationError) -> RetryDecision {
    if !error.is_retryable() {
        return RetryDecision::NotRetryable;
    }
    if attempt >= policy.max_attempts {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(policy.delay)
}

/// Result of running an operation under a retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Final result: `Ok` on the first successful attempt, otherwise the last failure.
    pub result: Result<(), OperationError>,
    /// Number of invocations made.
    pub attempts: u32,
    /// Failures of attempts that were followed by a retry.
    pub intermediate_errors: Vec<OperationError>,
}

impl RetryOutcome {
    /// Returns true if the operation eventually succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs one task's operation under its retry policy.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    run: Option<Arc<RunContext>>,
}

impl RetryExecutor {
    /// Creates an executor for the given policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, run: None }
    }

    /// Emits per-attempt diagnostics to the run's sink.
    #[must_use]
    pub fn with_run_context(mut self, run: Arc<RunContext>) -> Self {
        self.run = Some(run);
        self
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invokes `operation` with the 1-based attempt number until it succeeds,
    /// fails permanently, or the policy runs out of attempts.
    pub async fn execute<F, Fut>(&self, task_id: &str, mut operation: F) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), OperationError>>,
    {
        let mut attempt = 0;
        let mut intermediate_errors = Vec::new();

        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(()) => {
                    return RetryOutcome {
                        result: Ok(()),
                        attempts: attempt,
                        intermediate_errors,
                    };
                }
                Err(e) => e,
            };

            self.emit(
                "task.attempt_failed",
                task_id,
                serde_json::json!({ "attempt": attempt, "error": error.message }),
            );

            match should_retry(attempt, &self.policy, &error) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        task = %task_id,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "attempt failed; retrying"
                    );
                    self.emit(
                        "task.retrying",
                        task_id,
                        serde_json::json!({ "next_attempt": attempt + 1, "delay_ms": delay.as_millis() }),
                    );
                    intermediate_errors.push(error);
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    debug!(task = %task_id, attempts = attempt, "giving up");
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                        intermediate_errors,
                    };
                }
            }
        }
    }

    fn emit(&self, kind: &str, task_id: &str, data: serde_json::Value) {
        if let Some(run) = &self.run {
            run.emit_task(kind, task_id, data);
        }
    }
}
