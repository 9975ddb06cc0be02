//! Error types for the churnflow orchestration engine.
//!
//! The taxonomy follows the failure modes of a pipeline run:
//! configuration problems are rejected before anything executes, task
//! failures are recorded per task, and process supervision failures are
//! reported by the supervisor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The main error type for churnflow operations.
#[derive(Debug, Error)]
pub enum ChurnflowError {
    /// The task graph or pipeline configuration is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A task did not succeed.
    #[error("{0}")]
    Task(#[from] TaskError),

    /// The supervised service process misbehaved.
    #[error("{0}")]
    Process(#[from] ProcessError),

    /// The configuration file could not be read.
    #[error("Failed to read config file {path:?}: {source}")]
    ConfigRead {
        /// The file that was read.
        path: std::path::PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a configuration error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONFIG-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a task graph or pipeline configuration is rejected.
///
/// Always produced before any task operation has been invoked.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The tasks involved in the error.
    pub tasks: Vec<String>,
    /// Structured error info.
    pub error_info: ContractErrorInfo,
}

impl ConfigurationError {
    /// Creates a configuration error with an explicit code.
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error_info: ContractErrorInfo::new(code, message.clone()),
            message,
            tasks: Vec::new(),
        }
    }

    /// Sets the tasks involved.
    #[must_use]
    pub fn with_tasks(mut self, tasks: Vec<String>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.error_info = self.error_info.with_fix_hint(hint);
        self
    }

    /// Returns the error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.error_info.code
    }

    /// The dependency relation contains a cycle.
    #[must_use]
    pub fn cycle(cycle_path: Vec<String>) -> Self {
        Self::new(
            "CONFIG-CYCLE",
            format!("Cycle detected in task graph: {}", cycle_path.join(" -> ")),
        )
        .with_tasks(cycle_path)
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.")
    }

    /// A task depends on an id that is not part of the run.
    #[must_use]
    pub fn missing_dependency(task: &str, dependency: &str) -> Self {
        Self::new(
            "CONFIG-MISSING-DEP",
            format!("Task '{task}' depends on unknown task '{dependency}'"),
        )
        .with_tasks(vec![task.to_string(), dependency.to_string()])
        .with_fix_hint("Check for typos in task ids, or register the missing task.")
    }

    /// Two tasks share the same id.
    #[must_use]
    pub fn duplicate(task: &str) -> Self {
        Self::new("CONFIG-DUPLICATE", format!("Task '{task}' is registered more than once"))
            .with_tasks(vec![task.to_string()])
            .with_fix_hint("Task ids must be unique within a run.")
    }

    /// A task lists itself as a dependency.
    #[must_use]
    pub fn self_dependency(task: &str) -> Self {
        Self::new("CONFIG-SELF-DEP", format!("Task '{task}' cannot depend on itself"))
            .with_tasks(vec![task.to_string()])
    }

    /// The run contains no tasks.
    #[must_use]
    pub fn empty() -> Self {
        Self::new("CONFIG-EMPTY", "Task graph has no tasks")
            .with_fix_hint("Add at least one task before running.")
    }

    /// A retry policy allows zero attempts.
    #[must_use]
    pub fn invalid_retry(task: &str) -> Self {
        Self::new(
            "CONFIG-RETRY",
            format!("Task '{task}' has a retry policy with max_attempts = 0"),
        )
        .with_tasks(vec![task.to_string()])
        .with_fix_hint("max_attempts counts the first invocation and must be at least 1.")
    }

    /// A configuration value is semantically invalid.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new("CONFIG-INVALID", message)
    }
}

/// Whether a failed operation may be invoked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The failure may go away on re-invocation.
    #[default]
    Transient,
    /// Re-invoking the operation cannot help.
    Permanent,
}

/// The typed failure returned by a task operation.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct OperationError {
    /// Retry classification.
    pub kind: FailureKind,
    /// Rendered error message, including its cause chain.
    pub message: String,
}

impl OperationError {
    /// Creates a transient failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    /// Creates a permanent failure that is never retried.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    /// Returns true if the operation may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        Self::transient(format!("{err:#}"))
    }
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        Self::transient(err.to_string())
    }
}

impl From<ProcessError> for OperationError {
    fn from(err: ProcessError) -> Self {
        Self::permanent(err.to_string())
    }
}

/// Terminal cause of a task that resolved `Failed`.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskError {
    /// The operation's final attempt failed.
    #[error("Task '{task}' failed after {attempts} attempt(s): {source}")]
    Failed {
        /// The failed task.
        task: String,
        /// Number of invocations made.
        attempts: u32,
        /// The last attempt's failure.
        source: OperationError,
    },

    /// The task was skipped because an upstream task failed.
    #[error("Task '{task}' skipped: dependency '{upstream}' failed")]
    DependencyFailed {
        /// The skipped task.
        task: String,
        /// The upstream task that failed.
        upstream: String,
    },

    /// The task was never started because the run was aborted.
    #[error("Task '{task}' not started: run aborted after '{first_failure}' failed")]
    Aborted {
        /// The task that was not started.
        task: String,
        /// The task whose failure aborted the run.
        first_failure: String,
    },

    /// The task was never started because the run was cancelled.
    #[error("Task '{task}' not started: run cancelled")]
    Cancelled {
        /// The task that was not started.
        task: String,
    },
}

impl TaskError {
    /// Returns the id of the task this error belongs to.
    #[must_use]
    pub fn task(&self) -> &str {
        match self {
            Self::Failed { task, .. }
            | Self::DependencyFailed { task, .. }
            | Self::Aborted { task, .. }
            | Self::Cancelled { task } => task,
        }
    }

    /// Returns true if the task's own operation failed.
    #[must_use]
    pub fn is_task_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true if the task was skipped because of an upstream failure.
    #[must_use]
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::DependencyFailed { .. })
    }
}

/// Errors raised while supervising the auxiliary service process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process could not be spawned.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        /// The program that was launched.
        program: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// `start()` was called on a process that was already started.
    #[error("Process already started (state: {0})")]
    AlreadyStarted(String),

    /// A readiness wait was requested before `start()`.
    #[error("Process has not been started")]
    NotStarted,

    /// A readiness wait was requested after the process stopped or failed.
    #[error("Process is not running (state: {0})")]
    NotRunning(String),

    /// The health check could not be constructed.
    #[error("Invalid health check: {0}")]
    HealthCheck(String),

    /// The health check never reported ready.
    #[error("Service did not become ready after {attempts} health check(s) over {waited:?}")]
    StartupTimeout {
        /// Number of health probes made.
        attempts: u32,
        /// Time spent waiting.
        waited: Duration,
    },

    /// The process exited before it became ready.
    #[error("Service exited during startup (exit code: {code:?})")]
    ExitedDuringStartup {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
    },

    /// Sending a signal to the process failed.
    #[error("Failed to signal process {pid}: {message}")]
    Signal {
        /// Target pid.
        pid: u32,
        /// OS error message.
        message: String,
    },

    /// IO error while waiting on or killing the process.
    #[error("Process IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Returns true if this is a startup timeout.
    #[must_use]
    pub fn is_startup_timeout(&self) -> bool {
        matches!(self, Self::StartupTimeout { .. })
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, ChurnflowError>;
