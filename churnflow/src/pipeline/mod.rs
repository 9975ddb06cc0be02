//! Pipeline building and execution.
//!
//! This module provides:
//! - Task specifications and retry policies
//! - A graph builder that rejects cycles and unknown dependencies
//! - A concurrent, handle-based scheduler with fail-fast semantics
//! - Per-task records and the final run report

mod builder;
mod dag;
mod handle;
mod report;
mod retry;
mod scheduler;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use builder::TaskGraphBuilder;
pub use dag::TaskGraph;
pub use handle::{first_failed, TaskHandle};
pub use report::{PipelineRun, TaskRecord};
pub use retry::{should_retry, RetryDecision, RetryExecutor, RetryOutcome, RetryPolicy};
pub use scheduler::{run_tasks, Scheduler, SchedulerConfig};
pub use spec::Task;
