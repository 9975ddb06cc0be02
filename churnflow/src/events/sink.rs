//! Event sink trait and implementations.

use super::RunEvent;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Diagnostic sink that receives run events.
///
/// Sinks are attached to a [`RunContext`](crate::context::RunContext) and live
/// exactly as long as the run. Emission must never fail or block for long;
/// implementations swallow their own errors.
pub trait EventSink: Send + Sync {
    /// Records an event.
    fn emit(&self, event: RunEvent);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: RunEvent) {}
}

/// An event sink that forwards events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: RunEvent) {
        let task = event.task.as_deref().unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(
                run_id = %event.run_id,
                task = %task,
                event_data = %event.data,
                "event: {}", event.kind
            );
        } else {
            info!(
                run_id = %event.run_id,
                task = %task,
                event_data = %event.data,
                "event: {}", event.kind
            );
        }
    }
}

/// A collecting event sink, mainly for tests and post-run inspection.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the task ids of every event of the given kind, in order.
    #[must_use]
    pub fn tasks_with(&self, kind: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .filter_map(|e| e.task.clone())
            .collect()
    }

    /// Returns events whose kind starts with the given prefix.
    #[must_use]
    pub fn events_of_kind(&self, prefix: &str) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: RunEvent) {
        self.events.write().push(event);
    }
}
