//! End-to-end tests of graph validation, retries and scheduling together.

#[cfg(test)]
mod tests {
    use crate::core::{RunState, TaskStatus};
    use crate::errors::{OperationError, TaskError};
    use crate::pipeline::{
        run_tasks, RetryPolicy, Scheduler, SchedulerConfig, Task, TaskGraph, TaskGraphBuilder,
    };
    use crate::tasks::{operation_fn, TaskOperation};
    use crate::testing::{
        assert_dependency_failed, assert_run_succeeded, assert_task_failed, ExecutionLog,
        FailingOperation, MockOperation, SlowOperation, TestRun,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn slow(log: &ExecutionLog, secs: u64) -> Arc<dyn TaskOperation> {
        log.wrapping(Arc::new(SlowOperation::with_delay_secs(secs)))
    }

    /// The churn chain with every step backed by a recorded sleep.
    fn churn_tasks(log: &ExecutionLog) -> Vec<Task> {
        vec![
            Task::new("get_data", slow(log, 4)),
            Task::new("start_proc", slow(log, 9)),
            Task::new("ingest", slow(log, 2)).with_dependencies(["get_data", "start_proc"]),
            Task::new("validate", slow(log, 1)).with_dependency("ingest"),
            Task::new("prepare", slow(log, 1)).with_dependency("validate"),
            Task::new("transform", slow(log, 1)).with_dependency("prepare"),
        ]
    }

    fn assert_topological(log: &ExecutionLog, tasks: &[Task]) {
        for task in tasks {
            let Some(started) = log.first_start(&task.id) else {
                continue;
            };
            for dep in &task.dependencies {
                let finished = log
                    .last_finish(dep)
                    .unwrap_or_else(|| panic!("'{}' ran but dependency '{dep}' did not", task.id));
                assert!(
                    finished <= started,
                    "'{}' started before dependency '{dep}' finished",
                    task.id
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_churn_chain_runs_in_dependency_order() {
        let log = ExecutionLog::new();
        let tasks = churn_tasks(&log);
        let run = TestRun::new("churn");

        let report = run_tasks(run.context.clone(), SchedulerConfig::default(), tasks.clone())
            .await
            .unwrap();

        assert_run_succeeded(&report);
        assert_topological(&log, &tasks);
        // get_data and start_proc overlap, so ingest waits only for the slower one.
        assert_eq!(
            log.first_start("ingest").unwrap() - log.first_start("get_data").unwrap(),
            Duration::from_secs(9)
        );
        assert_eq!(report.submission_order.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wide_graphs_respect_every_edge() {
        // Several acyclic shapes: diamond, fan-out/fan-in, and a layered mesh.
        let shapes: Vec<Vec<(&str, Vec<&str>)>> = vec![
            vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["a"]), ("d", vec!["b", "c"])],
            vec![
                ("root", vec![]),
                ("x1", vec!["root"]),
                ("x2", vec!["root"]),
                ("x3", vec!["root"]),
                ("x4", vec!["root"]),
                ("sink", vec!["x1", "x2", "x3", "x4"]),
            ],
            vec![
                ("l0a", vec![]),
                ("l0b", vec![]),
                ("l1a", vec!["l0a"]),
                ("l1b", vec!["l0a", "l0b"]),
                ("l2a", vec!["l1a", "l1b"]),
                ("l2b", vec!["l0b", "l1b"]),
                ("l3", vec!["l2a", "l2b", "l0a"]),
            ],
        ];

        for (index, shape) in shapes.into_iter().enumerate() {
            let log = ExecutionLog::new();
            let tasks: Vec<Task> = shape
                .iter()
                .enumerate()
                .map(|(i, (id, deps))| {
                    Task::new(*id, slow(&log, (i as u64 % 3) + 1)).with_dependencies(deps.clone())
                })
                .collect();

            let report =
                run_tasks(TestRun::default().context, SchedulerConfig::default(), tasks.clone())
                    .await
                    .unwrap();

            assert_run_succeeded(&report);
            assert_topological(&log, &tasks);
            assert_eq!(log.entries().len(), tasks.len(), "shape {index} ran every task once");
        }
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_anything_runs() {
        let first = Arc::new(MockOperation::new());
        let second = Arc::new(MockOperation::new());
        let tasks = vec![
            Task::new("get_data", Arc::new(MockOperation::new())),
            Task::new("validate", first.clone()).with_dependencies(["get_data", "prepare"]),
            Task::new("prepare", second.clone()).with_dependency("validate"),
        ];

        let err = run_tasks(TestRun::default().context, SchedulerConfig::default(), tasks)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CONFIG-CYCLE");
        assert_eq!(first.call_count() + second.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_task_exhausts_attempts_with_delay() {
        let log = ExecutionLog::new();
        let failing = Arc::new(FailingOperation::new("kaggle returned 503"));
        let tasks = vec![Task::new("get_data", log.wrapping(failing.clone()))
            .with_retry_policy(RetryPolicy::new(4, Duration::from_secs(10)))];

        let report = run_tasks(TestRun::default().context, SchedulerConfig::default(), tasks)
            .await
            .unwrap();

        assert_eq!(failing.call_count(), 4);
        assert_task_failed(&report, "get_data", 4);
        assert_eq!(report.tasks["get_data"].attempt_errors.len(), 3);

        let starts: Vec<_> = log.entries().iter().map(|e| e.started).collect();
        for pair in starts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(10));
        }
        assert_eq!(report.final_state, RunState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_mid_chain() {
        let flaky = Arc::new(MockOperation::failing_times(2));
        let downstream = Arc::new(MockOperation::new());
        let tasks = vec![
            Task::new("ingest", flaky.clone())
                .with_retry_policy(RetryPolicy::new(4, Duration::from_secs(5))),
            Task::new("validate", downstream.clone()).with_dependency("ingest"),
        ];

        let report = run_tasks(TestRun::default().context, SchedulerConfig::default(), tasks)
            .await
            .unwrap();

        assert_run_succeeded(&report);
        assert_eq!(flaky.call_count(), 3);
        assert_eq!(report.tasks["ingest"].attempts, 3);
        assert_eq!(report.tasks["ingest"].attempt_errors.len(), 2);
        assert_eq!(downstream.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitive_dependents_fail_without_invocation() {
        let log = ExecutionLog::new();
        let failing = operation_fn("get_data", |_| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Err(OperationError::permanent("disk full"))
        });
        let mut tasks = churn_tasks(&log);
        tasks[0] = Task::new("get_data", log.wrapping(failing));
        let test_run = TestRun::new("churn");

        let report = run_tasks(test_run.context.clone(), SchedulerConfig::default(), tasks)
            .await
            .unwrap();

        assert_task_failed(&report, "get_data", 1);
        for task in ["ingest", "validate", "prepare", "transform"] {
            assert_dependency_failed(&report, task);
            assert!(!log.ran(task), "'{task}' must not be invoked");
        }
        // start_proc was already running and finishes normally.
        assert_eq!(report.status("start_proc"), Some(TaskStatus::Succeeded));
        assert!(matches!(
            report.first_failure,
            Some(TaskError::Failed { ref task, .. }) if task == "get_data"
        ));

        let mut skipped = test_run.events.tasks_with("task.skipped");
        skipped.sort();
        assert_eq!(skipped, vec!["ingest", "prepare", "transform", "validate"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_wins() {
        let tasks = vec![
            Task::new(
                "late",
                operation_fn("late", |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err(OperationError::permanent("late failure"))
                }),
            ),
            Task::new("early", Arc::new(FailingOperation::permanent("early failure"))),
        ];

        let report = run_tasks(TestRun::default().context, SchedulerConfig::default(), tasks)
            .await
            .unwrap();

        assert_eq!(report.first_failure.as_ref().map(TaskError::task), Some("early"));
        assert_task_failed(&report, "late", 1);
        assert_task_failed(&report, "early", 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_over_prebuilt_graph() {
        let log = ExecutionLog::new();
        let graph: TaskGraph = churn_tasks(&log)
            .into_iter()
            .try_fold(TaskGraphBuilder::new("churn"), TaskGraphBuilder::task)
            .and_then(TaskGraphBuilder::build)
            .unwrap();
        let tasks: Vec<Task> = graph
            .execution_order()
            .iter()
            .filter_map(|id| graph.task(id).cloned())
            .collect();
        let start = tokio::time::Instant::now();

        let config = SchedulerConfig {
            max_concurrency: Some(1),
            ..SchedulerConfig::default()
        };
        let report = Scheduler::with_config(TestRun::default().context, config)
            .run_graph(graph)
            .await
            .unwrap();

        assert_run_succeeded(&report);
        assert_topological(&log, &tasks);
        // One permit: the six sleeps never overlap.
        assert_eq!(start.elapsed(), Duration::from_secs(4 + 9 + 2 + 1 + 1 + 1));
    }
}
