//! The churn pipeline controller.

use super::{PipelineStep, PipelineSteps, ServiceSettings};
use super::{GET_DATA, INGEST, PREPARE, START_PROC, TRAIN, TRANSFORM, VALIDATE};
use crate::config::PipelineConfig;
use crate::context::{RunContext, RunIdentity, TaskContext};
use crate::errors::{ChurnflowError, ConfigurationError, OperationError, ProcessError};
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::{
    PipelineRun, RetryPolicy, Scheduler, SchedulerConfig, Task, TaskGraph, TaskGraphBuilder,
    TaskHandle,
};
use crate::process::{
    ManagedProcess, ProcessGuard, ProcessState, SharedProcess, StopOutcome,
};
use crate::tasks::TaskOperation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What happened to the service during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    /// State after the controller returned.
    pub final_state: ProcessState,
    /// How the running service was stopped, if it ever ran.
    pub stop_outcome: Option<StopOutcome>,
    /// Error raised while stopping, if any.
    pub stop_error: Option<String>,
}

impl ServiceReport {
    fn record(&mut self, result: Result<StopOutcome, ProcessError>) {
        match result {
            Ok(outcome) => {
                if self
                    .stop_outcome
                    .map_or(true, |current| current == StopOutcome::AlreadyStopped)
                {
                    self.stop_outcome = Some(outcome);
                }
            }
            Err(e) => {
                self.stop_error.get_or_insert_with(|| e.to_string());
            }
        }
    }
}

/// Final report of a controller run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// Per-task results.
    pub run: PipelineRun,
    /// Service teardown results.
    pub service: ServiceReport,
}

impl PipelineOutcome {
    /// Returns true if every task succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.run.is_success()
    }
}

/// Starts the service and waits for readiness. Private to the controller so
/// no user operation ever sees the process handle.
#[derive(Debug)]
struct StartService {
    process: SharedProcess,
    max_retries: u32,
    retry_delay: Duration,
}

#[async_trait]
impl TaskOperation for StartService {
    async fn execute(&self, _ctx: &TaskContext) -> Result<(), OperationError> {
        let mut process = self.process.lock().await;
        process.start()?;
        process.await_ready(self.max_retries, self.retry_delay).await?;
        Ok(())
    }
}

/// Holds an operation back until the service teardown has finished.
#[derive(Debug)]
struct AfterTeardown {
    inner: Arc<dyn TaskOperation>,
    teardown_done: watch::Receiver<bool>,
}

#[async_trait]
impl TaskOperation for AfterTeardown {
    async fn execute(&self, ctx: &TaskContext) -> Result<(), OperationError> {
        let mut done = self.teardown_done.clone();
        if done.wait_for(|finished| *finished).await.is_err() {
            return Err(OperationError::permanent("service teardown did not complete"));
        }
        self.inner.execute(ctx).await
    }
}

/// Runs the churn pipeline around a supervised service.
///
/// The chain is `get_data`, `start_proc`, `ingest` (after both), then
/// `validate`, `prepare`, `transform` and optionally `train`. The service is
/// stopped as soon as `ingest` resolves and the rest of the chain continues
/// afterwards. Whatever happens, the service is stopped before
/// [`run`](Self::run) returns.
pub struct PipelineController {
    name: String,
    steps: PipelineSteps,
    service: ServiceSettings,
    scheduler: SchedulerConfig,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("name", &self.name)
            .field("service", &self.service)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl PipelineController {
    /// Creates a controller.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: PipelineSteps, service: ServiceSettings) -> Self {
        Self {
            name: name.into(),
            steps,
            service,
            scheduler: SchedulerConfig::default(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Builds a controller running the configured commands.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ChurnflowError> {
        config.validate()?;
        let steps = PipelineSteps::from_config(config)?;
        let service = ServiceSettings::from_config(config)?;
        Ok(Self::new(&config.name, steps, service).with_scheduler_config(config.scheduler))
    }

    /// Sets the scheduler configuration.
    #[must_use]
    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// Sets the event sink for runs.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the validated task graph without running anything.
    ///
    /// # Errors
    ///
    /// Returns an error if a step's retry policy is invalid.
    pub fn graph(&self) -> Result<TaskGraph, ConfigurationError> {
        let placeholder: SharedProcess = Arc::new(Mutex::new(self.new_process()));
        let (_tx, rx) = watch::channel(false);
        self.build_graph(&placeholder, rx)
    }

    /// Runs the pipeline once.
    ///
    /// Task failures are reported in the outcome, not as errors. Dropping the
    /// returned future cancels the run: no further step is started, the
    /// pending teardown is aborted and the service is killed.
    ///
    /// # Errors
    ///
    /// Returns an error if the task graph is invalid; nothing runs then.
    pub async fn run(&self) -> Result<PipelineOutcome, ChurnflowError> {
        let run = Arc::new(
            RunContext::new(RunIdentity::new(&self.name)).with_event_sink(self.event_sink.clone()),
        );
        let process: SharedProcess = Arc::new(Mutex::new(
            self.new_process().with_run_context(run.clone()),
        ));
        let (teardown_tx, teardown_rx) = watch::channel(false);
        let graph = self.build_graph(&process, teardown_rx)?;

        let guard = ProcessGuard::new(process.clone(), self.service.graceful_timeout);
        info!(
            run_id = %run.run_id(),
            pipeline = %self.name,
            tasks = graph.len(),
            service = %self.service.name,
            "starting pipeline"
        );

        let mut scheduler = Scheduler::with_config(run.clone(), self.scheduler);
        scheduler.submit_graph(graph)?;
        let teardown = scheduler.handle(INGEST).cloned().map(|ingest| {
            TeardownTask(spawn_teardown(
                ingest,
                process.clone(),
                self.service.graceful_timeout,
                teardown_tx,
            ))
        });

        let report = scheduler.join().await;

        let mut service = ServiceReport {
            final_state: ProcessState::NotStarted,
            stop_outcome: None,
            stop_error: None,
        };
        if let Some(mut teardown) = teardown {
            match (&mut teardown.0).await {
                Ok(result) => service.record(result),
                Err(e) => error!(error = %e, "service teardown task failed"),
            }
        }
        service.record(guard.release().await);
        service.final_state = process.lock().await.state();

        if report.is_success() {
            info!(run_id = %report.run_id, "pipeline succeeded");
        } else {
            error!(
                run_id = %report.run_id,
                first_failure = report.first_failure.as_ref().map(ToString::to_string),
                "pipeline failed"
            );
        }

        Ok(PipelineOutcome {
            run: report,
            service,
        })
    }

    fn new_process(&self) -> ManagedProcess {
        ManagedProcess::new(
            &self.service.name,
            self.service.command.clone(),
            self.service.health_check.clone(),
        )
    }

    fn build_graph(
        &self,
        process: &SharedProcess,
        teardown_done: watch::Receiver<bool>,
    ) -> Result<TaskGraph, ConfigurationError> {
        let steps = &self.steps;
        let task = |id: &str, step: &PipelineStep| {
            Task::new(id, step.operation.clone()).with_retry_policy(step.retry_policy)
        };

        let start_service = StartService {
            process: process.clone(),
            max_retries: self.service.max_retries,
            retry_delay: self.service.retry_delay,
        };
        let mut start_proc = Task::new(START_PROC, Arc::new(start_service))
            .with_retry_policy(RetryPolicy::none());
        if self.service.requires_data {
            start_proc = start_proc.with_dependency(GET_DATA);
        }

        let validate = Task::new(
            VALIDATE,
            Arc::new(AfterTeardown {
                inner: steps.validate.operation.clone(),
                teardown_done,
            }),
        )
        .with_retry_policy(steps.validate.retry_policy)
        .with_dependency(INGEST);

        let mut builder = TaskGraphBuilder::new(&self.name)
            .task(task(GET_DATA, &steps.get_data))?
            .task(start_proc)?
            .task(task(INGEST, &steps.ingest).with_dependencies([GET_DATA, START_PROC]))?
            .task(validate)?
            .task(task(PREPARE, &steps.prepare).with_dependency(VALIDATE))?
            .task(task(TRANSFORM, &steps.transform).with_dependency(PREPARE))?;
        if let Some(train) = &steps.train {
            builder = builder.task(task(TRAIN, train).with_dependency(TRANSFORM))?;
        }
        builder.build()
    }
}

/// The detached teardown task, aborted if the run is dropped first.
struct TeardownTask(JoinHandle<Result<StopOutcome, ProcessError>>);

impl Drop for TeardownTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn spawn_teardown(
    ingest: TaskHandle,
    process: SharedProcess,
    graceful_timeout: Duration,
    done: watch::Sender<bool>,
) -> JoinHandle<Result<StopOutcome, ProcessError>> {
    tokio::spawn(async move {
        let status = ingest.wait().await;
        info!(ingest = %status, "ingest resolved; stopping service");
        let result = process.lock().await.stop(graceful_timeout).await;
        if let Err(e) = &result {
            warn!(error = %e, "service teardown reported an error");
        }
        done.send_replace(true);
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskStatus;
    use crate::process::ProcessCommand;
    use crate::tasks::operation_fn;
    use crate::testing::{
        assert_dependency_failed, assert_run_succeeded, assert_task_failed, ExecutionLog,
        FailingOperation, ScriptedHealthCheck, SlowOperation, TestRun,
    };
    use pretty_assertions::assert_eq;

    fn recorded_steps(log: &ExecutionLog) -> PipelineSteps {
        let step = || PipelineStep::new(log.recording());
        PipelineSteps::new(step(), step(), step(), step(), step())
    }

    fn service(health: Arc<ScriptedHealthCheck>) -> ServiceSettings {
        ServiceSettings::new("api", ProcessCommand::shell("sleep 60"), health)
            .with_readiness(10, Duration::from_secs(3))
            .with_graceful_timeout(Duration::from_secs(2))
    }

    #[test]
    fn test_graph_shape() {
        let log = ExecutionLog::new();
        let controller = PipelineController::new(
            "churn",
            recorded_steps(&log).with_train(PipelineStep::new(log.recording())),
            service(Arc::new(ScriptedHealthCheck::ready_on(1))),
        );

        let graph = controller.graph().unwrap();

        assert_eq!(
            graph.execution_order(),
            &["get_data", "start_proc", "ingest", "validate", "prepare", "transform", "train"]
        );
        assert!(graph.task(START_PROC).unwrap().dependencies.is_empty());
        assert!(!log.ran(GET_DATA));
    }

    #[test]
    fn test_requires_data_orders_service_after_acquisition() {
        let log = ExecutionLog::new();
        let controller = PipelineController::new(
            "churn",
            recorded_steps(&log),
            service(Arc::new(ScriptedHealthCheck::ready_on(1))).requiring_data(true),
        );

        let graph = controller.graph().unwrap();
        assert!(graph.task(START_PROC).unwrap().dependencies.contains(GET_DATA));
    }

    #[test]
    fn test_invalid_step_policy_is_rejected() {
        let log = ExecutionLog::new();
        let mut steps = recorded_steps(&log);
        steps.prepare.retry_policy = RetryPolicy::new(0, Duration::ZERO);
        let controller = PipelineController::new(
            "churn",
            steps,
            service(Arc::new(ScriptedHealthCheck::ready_on(1))),
        );

        assert_eq!(controller.graph().unwrap_err().code(), "CONFIG-RETRY");
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_successful_run_stops_service_before_validate() {
        let log = ExecutionLog::new();
        let test_run = TestRun::default();
        let events = test_run.events.clone();
        let mut steps = recorded_steps(&log);
        steps.validate = PipelineStep::new(operation_fn("check-stopped", move |_ctx| {
            let events = events.clone();
            async move {
                if events.events_of_kind("process.stopped").is_empty() {
                    Err(OperationError::permanent("service still running"))
                } else {
                    Ok(())
                }
            }
        }));
        let controller = PipelineController::new(
            "churn",
            steps,
            service(Arc::new(ScriptedHealthCheck::ready_on(1))),
        )
        .with_event_sink(test_run.events.clone());

        let outcome = controller.run().await.unwrap();

        assert_run_succeeded(&outcome.run);
        assert_eq!(outcome.service.final_state, ProcessState::Stopped);
        assert!(matches!(
            outcome.service.stop_outcome,
            Some(StopOutcome::Graceful | StopOutcome::Escalated | StopOutcome::Exited)
        ));
        assert!(outcome.service.stop_error.is_none());
        assert_eq!(test_run.events.events_of_kind("process.stopped").len(), 1);
        assert!(log.ran(TRANSFORM));
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_get_data_failure_skips_chain_and_stops_service() {
        let log = ExecutionLog::new();
        let mut steps = recorded_steps(&log);
        steps.get_data = PipelineStep::new(log.wrapping(Arc::new(FailingOperation::new(
            "kaggle unreachable",
        ))))
        .with_retry_policy(RetryPolicy::new(4, Duration::from_secs(10)));

        let controller = PipelineController::new(
            "churn",
            steps,
            service(Arc::new(ScriptedHealthCheck::ready_on(1))),
        );

        let outcome = controller.run().await.unwrap();
        let run = &outcome.run;

        assert!(!outcome.is_success());
        assert_task_failed(run, GET_DATA, 4);
        assert_eq!(log.count(GET_DATA), 4);
        for task in [INGEST, VALIDATE, PREPARE, TRANSFORM] {
            assert_dependency_failed(run, task);
            assert!(!log.ran(task));
        }
        assert_eq!(run.first_failure.as_ref().map(|e| e.task()), Some(GET_DATA));
        assert_eq!(outcome.service.final_state, ProcessState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_ingest_starts_only_after_third_health_poll() {
        let log = ExecutionLog::new();
        let health = Arc::new(ScriptedHealthCheck::ready_on(3));
        let controller =
            PipelineController::new("churn", recorded_steps(&log), service(health.clone()));

        let outcome = controller.run().await.unwrap();

        assert_run_succeeded(&outcome.run);
        let polls = health.poll_times();
        assert_eq!(polls.len(), 3);
        assert_eq!(polls[2] - polls[0], Duration::from_secs(6));
        assert!(log.first_start(INGEST).unwrap() >= polls[2]);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_startup_timeout_blocks_dependents() {
        let log = ExecutionLog::new();
        let health = Arc::new(ScriptedHealthCheck::never_ready());
        let controller =
            PipelineController::new("churn", recorded_steps(&log), service(health.clone()));

        let outcome = controller.run().await.unwrap();
        let run = &outcome.run;

        assert_eq!(health.poll_count(), 10);
        assert_eq!(run.status(GET_DATA), Some(TaskStatus::Succeeded));
        assert_task_failed(run, START_PROC, 1);
        assert!(run
            .error(START_PROC)
            .is_some_and(|e| e.to_string().contains("did not become ready")));
        for task in [INGEST, VALIDATE, PREPARE, TRANSFORM] {
            assert_dependency_failed(run, task);
        }
        assert_eq!(outcome.service.final_state, ProcessState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_starts_no_further_steps() {
        let log = ExecutionLog::new();
        let test_run = TestRun::default();
        let mut steps = recorded_steps(&log);
        steps.get_data =
            PipelineStep::new(log.wrapping(Arc::new(SlowOperation::with_delay_secs(5))));
        let controller = PipelineController::new(
            "churn",
            steps,
            service(Arc::new(ScriptedHealthCheck::ready_on(1))),
        )
        .with_event_sink(test_run.events.clone());

        let running = tokio::spawn(async move { controller.run().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_secs(60)).await;

        for task in [INGEST, VALIDATE, PREPARE, TRANSFORM] {
            assert!(!log.ran(task), "'{task}' must not run after cancellation");
        }
        assert_eq!(test_run.events.events_of_kind("run.cancelled").len(), 1);
        assert!(test_run
            .events
            .tasks_with("task.skipped")
            .contains(&INGEST.to_string()));
        assert!(test_run.events.events_of_kind("run.completed").is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_fails_start_proc() {
        let log = ExecutionLog::new();
        let settings = ServiceSettings::new(
            "api",
            ProcessCommand::new("/nonexistent/churn-api"),
            Arc::new(ScriptedHealthCheck::ready_on(1)),
        );
        let controller = PipelineController::new("churn", recorded_steps(&log), settings);

        let outcome = controller.run().await.unwrap();

        assert_task_failed(&outcome.run, START_PROC, 1);
        assert_eq!(outcome.service.final_state, ProcessState::Stopped);
        assert_eq!(outcome.service.stop_outcome, Some(StopOutcome::AlreadyStopped));
    }
}
