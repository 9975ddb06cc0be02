//! Execution contexts passed to task operations.

mod identity;
mod run;

pub use identity::RunIdentity;
pub use run::{RunContext, TaskContext};
