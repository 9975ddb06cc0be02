//! # Churnflow
//!
//! Dependency-graph orchestration for the customer churn data pipeline.
//!
//! Churnflow runs a fixed chain of opaque operations (acquire data, ingest,
//! validate, prepare, transform, train) around a supervised API service:
//!
//! - **Task graph**: tasks and edges are plain data, validated up front
//! - **Scheduler**: independent tasks run concurrently; a failure marks every
//!   transitive dependent as skipped without invoking it
//! - **Retries**: bounded attempts with a fixed delay per task
//! - **Process supervision**: health-checked startup, graceful stop with
//!   escalation, and guaranteed cleanup on every exit path
//! - **Run-scoped events**: each run carries its own diagnostic sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use churnflow::prelude::*;
//!
//! let config = churnflow::config::load_or_default(None)?;
//! let outcome = PipelineController::from_config(&config)?.run().await?;
//! assert!(outcome.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod app;
pub mod cli;
pub mod config;
pub mod context;
pub mod controller;
pub mod core;
pub mod errors;
pub mod events;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod tasks;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{DataSource, PipelineConfig};
    pub use crate::context::{RunContext, RunIdentity, TaskContext};
    pub use crate::controller::{
        PipelineController, PipelineOutcome, PipelineStep, PipelineSteps, ServiceSettings,
    };
    pub use crate::core::{RunState, TaskStatus};
    pub use crate::errors::{
        ChurnflowError, ConfigurationError, FailureKind, OperationError, ProcessError, Result,
        TaskError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        PipelineRun, RetryPolicy, Scheduler, SchedulerConfig, Task, TaskGraph, TaskGraphBuilder,
        TaskHandle,
    };
    pub use crate::process::{
        HealthCheck, HealthStatus, HttpHealthCheck, ManagedProcess, ProcessCommand, ProcessGuard,
        ProcessState, StopOutcome,
    };
    pub use crate::tasks::{operation_fn, CommandOperation, TaskOperation};
}
