//! Testing utilities for churnflow pipelines.
//!
//! This module provides:
//! - Mock operations with scripted failures and call counting
//! - A shared execution log for ordering assertions
//! - A scripted health check for process supervision tests
//! - Assertions over run reports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_dependency_failed, assert_run_succeeded, assert_task_failed, assert_task_status,
};
pub use fixtures::TestRun;
pub use mocks::{
    ExecutionLog, FailingOperation, MockOperation, RecordedExecution, ScriptedHealthCheck,
    SlowOperation,
};
