//! Run-scoped and task-scoped execution contexts.

use super::RunIdentity;
use crate::events::{EventSink, NoOpEventSink, RunEvent};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// The context shared by every task of one run.
///
/// Carries the run identity and the diagnostic sink chosen by the caller.
/// Created when a run starts and dropped with it.
#[derive(Clone)]
pub struct RunContext {
    identity: RunIdentity,
    event_sink: Arc<dyn EventSink>,
}

impl RunContext {
    /// Creates a new run context with a no-op sink.
    #[must_use]
    pub fn new(identity: RunIdentity) -> Self {
        Self {
            identity,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.identity.run_id
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    /// Emits a run-level event.
    pub fn emit(&self, kind: &str, data: serde_json::Value) {
        self.event_sink
            .emit(RunEvent::run(self.run_id(), kind).with_data(data));
    }

    /// Emits a task-level event.
    pub fn emit_task(&self, kind: &str, task: &str, data: serde_json::Value) {
        self.event_sink
            .emit(RunEvent::task(self.run_id(), kind, task).with_data(data));
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// The context handed to a task operation for one attempt.
#[derive(Debug, Clone)]
pub struct TaskContext {
    run: Arc<RunContext>,
    task_id: String,
    attempt: u32,
}

impl TaskContext {
    /// Creates a task context for the given attempt (1-based).
    #[must_use]
    pub fn new(run: Arc<RunContext>, task_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            run,
            task_id: task_id.into(),
            attempt,
        }
    }

    /// Returns the owning run context.
    #[must_use]
    pub fn run(&self) -> &RunContext {
        &self.run
    }

    /// Returns the task id.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Returns the current attempt number, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Emits an event tagged with this task.
    pub fn emit(&self, kind: &str, data: serde_json::Value) {
        self.run.emit_task(kind, &self.task_id, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;

    #[test]
    fn test_task_context_emits_through_run_sink() {
        let sink = Arc::new(CollectingEventSink::new());
        let run = Arc::new(RunContext::new(RunIdentity::new("churn")).with_event_sink(sink.clone()));
        let ctx = TaskContext::new(run.clone(), "ingest", 2);

        ctx.emit("ingest.rows", serde_json::json!({"rows": 7043}));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].task.as_deref(), Some("ingest"));
        assert_eq!(events[0].run_id, run.run_id());
        assert_eq!(ctx.attempt(), 2);
    }
}
