//! Mock operations and health checks for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::context::TaskContext;
use crate::errors::{FailureKind, OperationError};
use crate::process::{HealthCheck, HealthStatus};
use crate::tasks::TaskOperation;

/// An operation that fails a configurable number of times, then succeeds.
#[derive(Debug)]
pub struct MockOperation {
    failures_left: Mutex<u32>,
    kind: FailureKind,
    calls: Mutex<u32>,
}

impl MockOperation {
    /// Creates a mock that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::failing_times(0)
    }

    /// Creates a mock whose first `n` calls fail transiently.
    #[must_use]
    pub fn failing_times(n: u32) -> Self {
        Self {
            failures_left: Mutex::new(n),
            kind: FailureKind::Transient,
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of invocations so far.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        *self.calls.lock()
    }
}

impl Default for MockOperation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskOperation for MockOperation {
    async fn execute(&self, ctx: &TaskContext) -> Result<(), OperationError> {
        *self.calls.lock() += 1;
        let mut left = self.failures_left.lock();
        if *left == 0 {
            return Ok(());
        }
        *left -= 1;
        Err(OperationError {
            kind: self.kind,
            message: format!("{} scripted failure on attempt {}", ctx.task_id(), ctx.attempt()),
        })
    }
}

/// An operation that always fails.
#[derive(Debug)]
pub struct FailingOperation {
    error: OperationError,
    calls: Mutex<u32>,
}

impl FailingOperation {
    /// Creates an operation failing transiently with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: OperationError::transient(message),
            calls: Mutex::new(0),
        }
    }

    /// Creates an operation failing permanently with `message`.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            error: OperationError::permanent(message),
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of invocations so far.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl TaskOperation for FailingOperation {
    async fn execute(&self, _ctx: &TaskContext) -> Result<(), OperationError> {
        *self.calls.lock() += 1;
        Err(self.error.clone())
    }
}

/// An operation that sleeps before succeeding.
#[derive(Debug)]
pub struct SlowOperation {
    delay: Duration,
}

impl SlowOperation {
    /// Creates a new slow operation.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Creates a slow operation with delay in seconds.
    #[must_use]
    pub fn with_delay_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }
}

#[async_trait]
impl TaskOperation for SlowOperation {
    async fn execute(&self, _ctx: &TaskContext) -> Result<(), OperationError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedExecution {
    /// Task id from the context.
    pub task: String,
    /// Attempt number.
    pub attempt: u32,
    /// When the invocation began.
    pub started: Instant,
    /// When the invocation returned.
    pub finished: Instant,
    /// Whether it returned `Ok`.
    pub succeeded: bool,
}

/// A log shared by several recording operations, used to check ordering.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<RecordedExecution>>>,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An operation that records itself and succeeds.
    #[must_use]
    pub fn recording(&self) -> Arc<dyn TaskOperation> {
        Arc::new(RecordingOperation {
            log: self.clone(),
            inner: None,
        })
    }

    /// An operation that records itself around `inner`.
    #[must_use]
    pub fn wrapping(&self, inner: Arc<dyn TaskOperation>) -> Arc<dyn TaskOperation> {
        Arc::new(RecordingOperation {
            log: self.clone(),
            inner: Some(inner),
        })
    }

    /// Returns all recorded executions in completion order.
    #[must_use]
    pub fn entries(&self) -> Vec<RecordedExecution> {
        self.entries.lock().clone()
    }

    /// Returns the number of invocations of `task`.
    #[must_use]
    pub fn count(&self, task: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.task == task).count()
    }

    /// Returns true if `task` was ever invoked.
    #[must_use]
    pub fn ran(&self, task: &str) -> bool {
        self.count(task) > 0
    }

    /// Returns when `task` was first invoked.
    #[must_use]
    pub fn first_start(&self, task: &str) -> Option<Instant> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.task == task)
            .map(|e| e.started)
            .min()
    }

    /// Returns when `task` last returned.
    #[must_use]
    pub fn last_finish(&self, task: &str) -> Option<Instant> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.task == task)
            .map(|e| e.finished)
            .max()
    }
}

#[derive(Debug)]
struct RecordingOperation {
    log: ExecutionLog,
    inner: Option<Arc<dyn TaskOperation>>,
}

#[async_trait]
impl TaskOperation for RecordingOperation {
    async fn execute(&self, ctx: &TaskContext) -> Result<(), OperationError> {
        let started = Instant::now();
        let result = match &self.inner {
            Some(inner) => inner.execute(ctx).await,
            None => Ok(()),
        };
        self.log.entries.lock().push(RecordedExecution {
            task: ctx.task_id().to_string(),
            attempt: ctx.attempt(),
            started,
            finished: Instant::now(),
            succeeded: result.is_ok(),
        });
        result
    }
}

/// A health check that becomes ready on a given poll.
#[derive(Debug, Default)]
pub struct ScriptedHealthCheck {
    ready_on: Option<u32>,
    polls: Mutex<Vec<Instant>>,
}

impl ScriptedHealthCheck {
    /// Reports ready from the `poll`-th probe (1-based) onwards.
    #[must_use]
    pub fn ready_on(poll: u32) -> Self {
        Self {
            ready_on: Some(poll),
            polls: Mutex::new(Vec::new()),
        }
    }

    /// Never reports ready.
    #[must_use]
    pub fn never_ready() -> Self {
        Self::default()
    }

    /// Returns the number of probes so far.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.polls.lock().len()
    }

    /// Returns when each probe happened.
    #[must_use]
    pub fn poll_times(&self) -> Vec<Instant> {
        self.polls.lock().clone()
    }
}

#[async_trait]
impl HealthCheck for ScriptedHealthCheck {
    async fn probe(&self) -> HealthStatus {
        let mut polls = self.polls.lock();
        polls.push(Instant::now());
        let n = u32::try_from(polls.len()).unwrap_or(u32::MAX);
        match self.ready_on {
            Some(ready_on) if n >= ready_on => HealthStatus::Ready,
            _ => HealthStatus::Unreachable("connection refused".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunContext, RunIdentity};

    fn ctx(task: &str, attempt: u32) -> TaskContext {
        TaskContext::new(Arc::new(RunContext::new(RunIdentity::new("test"))), task, attempt)
    }

    #[tokio::test]
    async fn test_mock_operation_fails_then_succeeds() {
        let op = MockOperation::failing_times(2);

        assert!(op.execute(&ctx("t", 1)).await.is_err());
        assert!(op.execute(&ctx("t", 2)).await.is_err());
        assert!(op.execute(&ctx("t", 3)).await.is_ok());
        assert_eq!(op.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_operation() {
        let op = FailingOperation::permanent("bad schema");
        let err = op.execute(&ctx("t", 1)).await.unwrap_err();

        assert!(!err.is_retryable());
        assert_eq!(op.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation() {
        let start = Instant::now();
        SlowOperation::with_delay_secs(2).execute(&ctx("t", 1)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_execution_log_records_wrapped_results() {
        let log = ExecutionLog::new();
        let ok = log.recording();
        let failing = log.wrapping(Arc::new(FailingOperation::new("down")));

        ok.execute(&ctx("a", 1)).await.unwrap();
        let _ = failing.execute(&ctx("b", 1)).await;
        let _ = failing.execute(&ctx("b", 2)).await;

        assert_eq!(log.count("a"), 1);
        assert_eq!(log.count("b"), 2);
        assert!(!log.ran("c"));
        let entries = log.entries();
        assert!(entries[0].succeeded);
        assert_eq!(entries[2].attempt, 2);
        assert!(!entries[2].succeeded);
    }

    #[tokio::test]
    async fn test_scripted_health_check() {
        let check = ScriptedHealthCheck::ready_on(3);

        assert!(!check.probe().await.is_ready());
        assert!(!check.probe().await.is_ready());
        assert!(check.probe().await.is_ready());
        assert_eq!(check.poll_count(), 3);

        assert!(!ScriptedHealthCheck::never_ready().probe().await.is_ready());
    }
}
