//! Task and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a task within a run.
///
/// Status only moves forward: `Pending -> Running -> Succeeded | Failed`,
/// or `Pending -> Failed` for a task that was never started. A task stays
/// `Running` across retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting for its dependencies.
    #[default]
    Pending,
    /// Task's operation is executing (possibly on a retry attempt).
    Running,
    /// Task completed successfully.
    Succeeded,
    /// Task failed, was skipped, or was never started.
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl TaskStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if moving from `self` to `next` respects the monotonic order.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Failed) => true,
            (Self::Running, Self::Running | Self::Succeeded | Self::Failed) => true,
            _ => false,
        }
    }
}

/// The final state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Every task succeeded.
    Succeeded,
    /// At least one task did not succeed.
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
