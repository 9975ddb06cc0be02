//! Test assertions for run reports.

use crate::core::TaskStatus;
use crate::errors::TaskError;
use crate::pipeline::PipelineRun;

/// Asserts that the run succeeded.
pub fn assert_run_succeeded(run: &PipelineRun) {
    assert!(
        run.is_success(),
        "Expected run to succeed, first failure: {:?}",
        run.first_failure
    );
}

/// Asserts that the task ended with the given status.
pub fn assert_task_status(run: &PipelineRun, task: &str, expected: TaskStatus) {
    assert_eq!(
        run.status(task),
        Some(expected),
        "Unexpected status for task '{task}'"
    );
}

/// Asserts that the task's own operation failed after `attempts` invocations.
pub fn assert_task_failed(run: &PipelineRun, task: &str, attempts: u32) {
    match run.error(task) {
        Some(TaskError::Failed { attempts: actual, .. }) => assert_eq!(
            *actual, attempts,
            "Task '{task}' failed after {actual} attempt(s), expected {attempts}"
        ),
        other => panic!("Expected task '{task}' to fail on its own, got {other:?}"),
    }
}

/// Asserts that the task was skipped because an upstream task failed, and
/// that its operation never ran.
pub fn assert_dependency_failed(run: &PipelineRun, task: &str) {
    assert!(
        run.error(task).is_some_and(TaskError::is_dependency_failure),
        "Expected task '{task}' to be skipped by a dependency failure, got {:?}",
        run.error(task)
    );
    assert_eq!(
        run.tasks.get(task).map(|r| r.attempts),
        Some(0),
        "Skipped task '{task}' must not be invoked"
    );
}
