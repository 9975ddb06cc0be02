//! Task specifications.

use super::RetryPolicy;
use crate::errors::ConfigurationError;
use crate::tasks::TaskOperation;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A named, retryable unit of work with declared upstream dependencies.
#[derive(Debug, Clone)]
pub struct Task {
    /// The unique id of the task within a run.
    pub id: String,
    /// The operation to invoke.
    pub operation: Arc<dyn TaskOperation>,
    /// Ids of tasks that must succeed before this one starts.
    pub dependencies: BTreeSet<String>,
    /// Retry policy applied to the operation.
    pub retry_policy: RetryPolicy,
}

impl Task {
    /// Creates a task with no dependencies and a single attempt.
    #[must_use]
    pub fn new(id: impl Into<String>, operation: Arc<dyn TaskOperation>) -> Self {
        Self {
            id: id.into(),
            operation,
            dependencies: BTreeSet::new(),
            retry_policy: RetryPolicy::none(),
        }
    }

    /// Replaces the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Checks the task on its own, independent of the rest of the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the task depends on itself or allows zero attempts.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.dependencies.contains(&self.id) {
            return Err(ConfigurationError::self_dependency(&self.id));
        }
        if self.retry_policy.max_attempts == 0 {
            return Err(ConfigurationError::invalid_retry(&self.id));
        }
        Ok(())
    }
}
