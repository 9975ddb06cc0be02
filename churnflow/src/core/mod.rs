//! Core status types shared by the scheduler, the supervisor and reports.

mod status;

pub use status::{RunState, TaskStatus};
