//! Test fixtures for run contexts.

use std::sync::Arc;

use crate::context::{RunContext, RunIdentity};
use crate::events::CollectingEventSink;

/// A run context wired to a collecting sink.
#[derive(Debug, Clone)]
pub struct TestRun {
    /// The run context to hand to schedulers and controllers.
    pub context: Arc<RunContext>,
    /// Every event emitted during the run.
    pub events: Arc<CollectingEventSink>,
}

impl TestRun {
    /// Creates a test run for `pipeline`.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        let events = Arc::new(CollectingEventSink::new());
        let context = Arc::new(
            RunContext::new(RunIdentity::new(pipeline)).with_event_sink(events.clone()),
        );
        Self { context, events }
    }
}

impl Default for TestRun {
    fn default() -> Self {
        Self::new("test")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_reach_the_collector() {
        let run = TestRun::new("churn");
        run.context.emit("run.started", serde_json::json!({}));

        assert_eq!(run.context.identity().pipeline, "churn");
        assert_eq!(run.events.len(), 1);
    }
}
