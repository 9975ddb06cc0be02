//! Per-task records and the final report of a run.

use crate::core::{RunState, TaskStatus};
use crate::errors::TaskError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Everything the scheduler knows about one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Current status.
    pub status: TaskStatus,
    /// Number of times the operation was invoked.
    pub attempts: u32,
    /// Messages of failed attempts that were retried.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempt_errors: Vec<String>,
    /// Terminal cause when the task failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// When the operation was first invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// The outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run ID.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the last task resolved.
    pub finished_at: DateTime<Utc>,
    /// `Succeeded` only if every task succeeded.
    pub final_state: RunState,
    /// The failure that caused the run to fail; later failures stay per-task.
    pub first_failure: Option<TaskError>,
    /// Task records keyed by id.
    pub tasks: BTreeMap<String, TaskRecord>,
    /// Task ids in submission order.
    pub submission_order: Vec<String>,
}

impl PipelineRun {
    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.final_state == RunState::Succeeded
    }

    /// Returns the status of one task.
    #[must_use]
    pub fn status(&self, task: &str) -> Option<TaskStatus> {
        self.tasks.get(task).map(|r| r.status)
    }

    /// Returns the terminal error of one task.
    #[must_use]
    pub fn error(&self, task: &str) -> Option<&TaskError> {
        self.tasks.get(task).and_then(|r| r.error.as_ref())
    }

    /// Returns the status of every task.
    #[must_use]
    pub fn task_statuses(&self) -> BTreeMap<String, TaskStatus> {
        self.tasks
            .iter()
            .map(|(id, record)| (id.clone(), record.status))
            .collect()
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Converts into a `Result`, surfacing the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failure when the run failed.
    pub fn into_result(self) -> Result<Self, TaskError> {
        match (&self.final_state, &self.first_failure) {
            (RunState::Failed, Some(err)) => Err(err.clone()),
            _ => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OperationError;

    fn sample(final_state: RunState, first_failure: Option<TaskError>) -> PipelineRun {
        let mut tasks = BTreeMap::new();
        tasks.insert(
            "get_data".to_string(),
            TaskRecord {
                status: TaskStatus::Failed,
                attempts: 4,
                error: first_failure.clone(),
                ..TaskRecord::default()
            },
        );
        PipelineRun {
            run_id: Uuid::new_v4(),
            pipeline: "churn".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            final_state,
            first_failure,
            tasks,
            submission_order: vec!["get_data".to_string()],
        }
    }

    #[test]
    fn test_into_result_surfaces_first_failure() {
        let failure = TaskError::Failed {
            task: "get_data".to_string(),
            attempts: 4,
            source: OperationError::transient("kaggle unreachable"),
        };
        let run = sample(RunState::Failed, Some(failure.clone()));

        assert!(!run.is_success());
        assert_eq!(run.status("get_data"), Some(TaskStatus::Failed));
        assert_eq!(run.error("get_data"), Some(&failure));
        assert_eq!(run.into_result().unwrap_err(), failure);
    }

    #[test]
    fn test_report_serializes_to_json() {
        let run = sample(RunState::Succeeded, None);
        let json = serde_json::to_value(&run).unwrap();

        assert_eq!(json["final_state"], "succeeded");
        assert_eq!(json["tasks"]["get_data"]["attempts"], 4);
        assert!(json["tasks"]["get_data"].get("attempt_errors").is_none());
    }
}
