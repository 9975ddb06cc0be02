//! Supervision of the auxiliary service process.
//!
//! A [`ManagedProcess`] is launched, health-gated, and terminated with a
//! graceful signal that escalates to a forced kill. [`ProcessGuard`] ties
//! the teardown to a scope.

mod command;
mod guard;
mod health;
mod supervisor;

pub use command::ProcessCommand;
pub use guard::{ProcessGuard, SharedProcess};
pub use health::{HealthCheck, HealthStatus, HttpHealthCheck, DEFAULT_HEALTH_URL};
pub use supervisor::{ManagedProcess, ProcessState, StopOutcome};
