//! Run-scoped diagnostic events.
//!
//! Every run carries its own sink through the
//! [`RunContext`](crate::context::RunContext); there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single diagnostic event emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Event kind, e.g. `task.started` or `process.ready`.
    pub kind: String,
    /// The run that emitted the event.
    pub run_id: Uuid,
    /// The task the event concerns, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// When the event was emitted.
    pub at: DateTime<Utc>,
}

impl RunEvent {
    /// Creates a run-level event.
    #[must_use]
    pub fn run(run_id: Uuid, kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            run_id,
            task: None,
            data: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    /// Creates a task-level event.
    #[must_use]
    pub fn task(run_id: Uuid, kind: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            task: Some(task.into()),
            ..Self::run(run_id, kind)
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_event_serialization() {
        let event = RunEvent::task(Uuid::new_v4(), "task.failed", "ingest")
            .with_data(serde_json::json!({"attempts": 4}));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "task.failed");
        assert_eq!(json["task"], "ingest");
        assert_eq!(json["data"]["attempts"], 4);
    }

    #[test]
    fn test_run_event_omits_task() {
        let event = RunEvent::run(Uuid::new_v4(), "run.started");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("task").is_none());
    }
}
