//! Concurrent task scheduler.
//!
//! Submission only records a task. Nothing starts until [`Scheduler::join`],
//! so a configuration error in a later submission leaves every task unrun.
//! On join each task gets its own Tokio task. It waits for the handles it
//! depends on, then runs its operation under its retry policy. A task whose
//! upstream failed never starts, and once any task has failed no new task is
//! started. Tasks that are already running are allowed to finish.
//!
//! Dropping a scheduler before its join completed cancels the run: tasks that
//! have not started yet resolve `Failed` without being invoked.

use super::handle::{first_failed, TaskHandle};
use super::{PipelineRun, RetryExecutor, RetryOutcome, Task, TaskGraph, TaskGraphBuilder, TaskRecord};
use crate::context::{RunContext, TaskContext};
use crate::core::{RunState, TaskStatus};
use crate::errors::{ConfigurationError, OperationError, TaskError};
use crate::tasks::TaskOperation;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running operations. `None` means unbounded.
    pub max_concurrency: Option<usize>,
    /// Stop starting new tasks once any task has failed.
    pub abort_on_failure: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            abort_on_failure: true,
        }
    }
}

struct Shared {
    run: Arc<RunContext>,
    config: SchedulerConfig,
    records: RwLock<HashMap<String, TaskRecord>>,
    first_failure: Mutex<Option<TaskError>>,
    limiter: Option<Arc<Semaphore>>,
    cancelled: AtomicBool,
}

impl Shared {
    fn transition(
        &self,
        id: &str,
        tx: &watch::Sender<TaskStatus>,
        next: TaskStatus,
        update: impl FnOnce(&mut TaskRecord),
    ) {
        {
            let mut records = self.records.write();
            let Some(record) = records.get_mut(id) else {
                return;
            };
            if !record.status.can_transition_to(next) {
                error!(task = %id, from = %record.status, to = %next, "ignoring invalid status transition");
                return;
            }
            record.status = next;
            update(record);
        }
        tx.send_replace(next);
    }

    /// Records `error` if it is the first failure of the run.
    fn record_failure(&self, error: &TaskError) -> bool {
        let mut first = self.first_failure.lock();
        if first.is_some() {
            return false;
        }
        *first = Some(error.clone());
        true
    }

    fn aborted_by(&self) -> Option<String> {
        if !self.config.abort_on_failure {
            return None;
        }
        self.first_failure.lock().as_ref().map(|e| e.task().to_string())
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            warn!(run_id = %self.run.run_id(), "run cancelled; no further tasks will be started");
            self.run.emit("run.cancelled", serde_json::json!({}));
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn skip(&self, tx: &watch::Sender<TaskStatus>, error: TaskError) {
        let id = error.task().to_string();
        info!(task = %id, reason = %error, "task skipped");
        self.run.emit_task(
            "task.skipped",
            &id,
            serde_json::json!({ "reason": error.to_string() }),
        );
        self.transition(&id, tx, TaskStatus::Failed, |r| {
            r.error = Some(error);
            r.finished_at = Some(Utc::now());
        });
    }

    fn finish(&self, id: &str, tx: &watch::Sender<TaskStatus>, outcome: RetryOutcome) {
        let attempts = outcome.attempts;
        let attempt_errors: Vec<String> = outcome
            .intermediate_errors
            .iter()
            .map(|e| e.message.clone())
            .collect();

        match outcome.result {
            Ok(()) => {
                info!(task = %id, attempts, "task succeeded");
                self.run
                    .emit_task("task.succeeded", id, serde_json::json!({ "attempts": attempts }));
                self.transition(id, tx, TaskStatus::Succeeded, |r| {
                    r.attempts = attempts;
                    r.attempt_errors = attempt_errors;
                    r.finished_at = Some(Utc::now());
                });
            }
            Err(source) => {
                let error = TaskError::Failed {
                    task: id.to_string(),
                    attempts,
                    source,
                };
                if self.record_failure(&error) && self.config.abort_on_failure {
                    warn!(task = %id, "first task failure; no further tasks will be started");
                }
                error!(task = %id, attempts, error = %error, "task failed");
                self.run.emit_task(
                    "task.failed",
                    id,
                    serde_json::json!({ "attempts": attempts, "error": error.to_string() }),
                );
                self.transition(id, tx, TaskStatus::Failed, |r| {
                    r.attempts = attempts;
                    r.attempt_errors = attempt_errors;
                    r.error = Some(error);
                    r.finished_at = Some(Utc::now());
                });
            }
        }
    }
}

/// A submitted task that has not been handed to a worker yet.
struct Pending {
    task: Task,
    upstream: Vec<TaskHandle>,
    tx: watch::Sender<TaskStatus>,
}

/// Runs tasks concurrently, honoring dependencies and retry policies.
///
/// Must be used from within a Tokio runtime.
pub struct Scheduler {
    shared: Arc<Shared>,
    handles: HashMap<String, TaskHandle>,
    submission_order: Vec<String>,
    pending: Vec<Pending>,
    started_at: DateTime<Utc>,
    joined: bool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("run_id", &self.shared.run.run_id())
            .field("tasks", &self.submission_order)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler with the default configuration.
    #[must_use]
    pub fn new(run: Arc<RunContext>) -> Self {
        Self::with_config(run, SchedulerConfig::default())
    }

    /// Creates a scheduler with an explicit configuration.
    #[must_use]
    pub fn with_config(run: Arc<RunContext>, config: SchedulerConfig) -> Self {
        let limiter = config
            .max_concurrency
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));

        info!(
            run_id = %run.run_id(),
            pipeline = %run.identity().pipeline,
            "run started"
        );
        run.emit(
            "run.started",
            serde_json::json!({ "pipeline": run.identity().pipeline }),
        );

        Self {
            started_at: run.identity().started_at,
            shared: Arc::new(Shared {
                run,
                config,
                records: RwLock::new(HashMap::new()),
                first_failure: Mutex::new(None),
                limiter,
                cancelled: AtomicBool::new(false),
            }),
            handles: HashMap::new(),
            submission_order: Vec::new(),
            pending: Vec::new(),
            joined: false,
        }
    }

    /// Returns the run context.
    #[must_use]
    pub fn run_context(&self) -> &Arc<RunContext> {
        &self.shared.run
    }

    /// Submits a task and returns its handle immediately.
    ///
    /// The task is not started here. Once [`join`](Self::join) is called it
    /// starts as soon as every handle in `wait_for` and every task named in
    /// its own dependencies has succeeded. Dependencies must already be
    /// submitted to this scheduler, which rules out cycles.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is invalid, its id is already taken, or a
    /// dependency is unknown to this run.
    pub fn submit(
        &mut self,
        task: Task,
        wait_for: &[TaskHandle],
    ) -> Result<TaskHandle, ConfigurationError> {
        let mut task = task;
        task.validate()?;
        if self.handles.contains_key(&task.id) {
            return Err(ConfigurationError::duplicate(&task.id));
        }
        task.dependencies
            .extend(wait_for.iter().map(|h| h.id().to_string()));

        let upstream = task
            .dependencies
            .iter()
            .map(|dep| {
                self.handles
                    .get(dep)
                    .cloned()
                    .ok_or_else(|| ConfigurationError::missing_dependency(&task.id, dep))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, rx) = watch::channel(TaskStatus::Pending);
        let handle = TaskHandle::new(task.id.clone(), rx);
        let id = task.id.clone();

        self.shared
            .records
            .write()
            .insert(id.clone(), TaskRecord::default());
        self.handles.insert(id.clone(), handle.clone());
        self.submission_order.push(id.clone());

        self.pending.push(Pending { task, upstream, tx });

        Ok(handle)
    }

    /// Returns the handle of a submitted task.
    #[must_use]
    pub fn handle(&self, id: &str) -> Option<&TaskHandle> {
        self.handles.get(id)
    }

    /// Returns the current status of a submitted task.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.shared.records.read().get(id).map(|r| r.status)
    }

    /// Returns the current status of every submitted task.
    #[must_use]
    pub fn statuses(&self) -> BTreeMap<String, TaskStatus> {
        self.shared
            .records
            .read()
            .iter()
            .map(|(id, r)| (id.clone(), r.status))
            .collect()
    }

    /// Submits every task of a validated graph in topological order.
    ///
    /// # Errors
    ///
    /// Returns an error if a task id collides with one already submitted.
    pub fn submit_graph(&mut self, graph: TaskGraph) -> Result<Vec<TaskHandle>, ConfigurationError> {
        graph
            .into_ordered_tasks()
            .into_iter()
            .map(|task| self.submit(task, &[]))
            .collect()
    }

    /// Starts every submitted task, waits for all of them to resolve and
    /// reports the run.
    ///
    /// Dropping the returned future before it completes cancels the run.
    pub async fn join(mut self) -> PipelineRun {
        let workers: Vec<(String, JoinHandle<()>)> = std::mem::take(&mut self.pending)
            .into_iter()
            .map(|Pending { task, upstream, tx }| {
                let id = task.id.clone();
                let worker = tokio::spawn(drive(self.shared.clone(), task, upstream, tx));
                (id, worker)
            })
            .collect();

        for (id, worker) in workers {
            if let Err(e) = worker.await {
                error!(task = %id, error = %e, "task worker terminated abnormally");
                let mut records = self.shared.records.write();
                if let Some(record) = records.get_mut(&id) {
                    if !record.status.is_terminal() {
                        let error = TaskError::Failed {
                            task: id.clone(),
                            attempts: record.attempts,
                            source: OperationError::permanent(format!("worker terminated: {e}")),
                        };
                        self.shared.record_failure(&error);
                        record.status = TaskStatus::Failed;
                        record.error = Some(error);
                        record.finished_at = Some(Utc::now());
                    }
                }
            }
        }

        let tasks: BTreeMap<String, TaskRecord> = self
            .shared
            .records
            .read()
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        let final_state = if tasks.values().all(|r| r.status == TaskStatus::Succeeded) {
            RunState::Succeeded
        } else {
            RunState::Failed
        };
        let first_failure = self.shared.first_failure.lock().clone();
        let run = &self.shared.run;

        let report = PipelineRun {
            run_id: run.run_id(),
            pipeline: run.identity().pipeline.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            final_state,
            first_failure,
            tasks,
            submission_order: std::mem::take(&mut self.submission_order),
        };

        match report.final_state {
            RunState::Succeeded => info!(run_id = %report.run_id, tasks = report.tasks.len(), "run succeeded"),
            RunState::Failed => error!(
                run_id = %report.run_id,
                first_failure = report.first_failure.as_ref().map(|e| e.task().to_string()),
                "run failed"
            ),
        }
        run.emit(
            "run.completed",
            serde_json::json!({
                "final_state": report.final_state,
                "duration_ms": report.duration().num_milliseconds(),
            }),
        );

        self.joined = true;
        report
    }

    /// Runs a validated graph to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if a task id collides with one already submitted.
    pub async fn run_graph(mut self, graph: TaskGraph) -> Result<PipelineRun, ConfigurationError> {
        self.submit_graph(graph)?;
        Ok(self.join().await)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.joined && !self.submission_order.is_empty() {
            self.shared.cancel();
        }
    }
}

/// Validates `tasks` as a graph and runs it.
///
/// Nothing is executed if validation fails.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] for duplicate ids, unknown dependencies,
/// cycles, or invalid retry policies.
pub async fn run_tasks(
    run: Arc<RunContext>,
    config: SchedulerConfig,
    tasks: impl IntoIterator<Item = Task>,
) -> Result<PipelineRun, ConfigurationError> {
    let mut builder = TaskGraphBuilder::new(run.identity().pipeline.clone());
    for task in tasks {
        builder.add_task(task)?;
    }
    let graph = builder.build()?;
    Scheduler::with_config(run, config).run_graph(graph).await
}

async fn drive(
    shared: Arc<Shared>,
    task: Task,
    upstream: Vec<TaskHandle>,
    tx: watch::Sender<TaskStatus>,
) {
    let id = task.id.clone();

    if let Some(failed) = first_failed(&upstream).await {
        shared.skip(
            &tx,
            TaskError::DependencyFailed {
                task: id,
                upstream: failed,
            },
        );
        return;
    }

    let _permit = match &shared.limiter {
        Some(limiter) => limiter.clone().acquire_owned().await.ok(),
        None => None,
    };

    if shared.is_cancelled() {
        shared.skip(&tx, TaskError::Cancelled { task: id });
        return;
    }

    if let Some(first_failure) = shared.aborted_by() {
        shared.skip(
            &tx,
            TaskError::Aborted {
                task: id,
                first_failure,
            },
        );
        return;
    }

    shared.transition(&id, &tx, TaskStatus::Running, |r| {
        r.started_at = Some(Utc::now());
    });
    info!(task = %id, max_attempts = task.retry_policy.max_attempts, "task started");
    shared.run.emit_task(
        "task.started",
        &id,
        serde_json::json!({ "max_attempts": task.retry_policy.max_attempts }),
    );

    let run = shared.run.clone();
    let operation = task.operation.clone();
    let outcome = RetryExecutor::new(task.retry_policy)
        .with_run_context(run.clone())
        .execute(&id, |attempt| {
            let ctx = TaskContext::new(run.clone(), id.clone(), attempt);
            let operation = operation.clone();
            async move { invoke(operation.as_ref(), &ctx).await }
        })
        .await;

    shared.finish(&id, &tx, outcome);
}

/// Runs one attempt, turning a panic into a permanent failure.
async fn invoke(operation: &dyn TaskOperation, ctx: &TaskContext) -> Result<(), OperationError> {
    AssertUnwindSafe(operation.execute(ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(OperationError::permanent(format!(
                "operation panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
