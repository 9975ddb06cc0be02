//! Task graph builder with validation.

use super::{Task, TaskGraph};
use crate::errors::ConfigurationError;
use std::collections::{HashMap, HashSet};

/// Builder for creating validated task graphs.
///
/// Tasks may be added in any order. Unknown dependencies and cycles are
/// detected by [`build`](Self::build), before anything can run.
#[derive(Debug, Clone)]
pub struct TaskGraphBuilder {
    name: String,
    tasks: HashMap<String, Task>,
    task_order: Vec<String>,
}

impl TaskGraphBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: HashMap::new(),
            task_order: Vec::new(),
        }
    }

    /// Adds a task, consuming and returning the builder.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is invalid on its own or its id is taken.
    pub fn task(mut self, task: Task) -> Result<Self, ConfigurationError> {
        self.add_task(task)?;
        Ok(self)
    }

    /// Adds a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is invalid on its own or its id is taken.
    pub fn add_task(&mut self, task: Task) -> Result<(), ConfigurationError> {
        task.validate()?;
        if self.tasks.contains_key(&task.id) {
            return Err(ConfigurationError::duplicate(&task.id));
        }
        self.task_order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of tasks added so far.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Validates the whole graph and freezes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is empty, references an unknown task, or
    /// contains a cycle.
    pub fn build(self) -> Result<TaskGraph, ConfigurationError> {
        if self.tasks.is_empty() {
            return Err(ConfigurationError::empty());
        }

        for id in &self.task_order {
            let task = &self.tasks[id];
            if let Some(missing) = task
                .dependencies
                .iter()
                .find(|dep| !self.tasks.contains_key(*dep))
            {
                return Err(ConfigurationError::missing_dependency(id, missing));
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(ConfigurationError::cycle(cycle));
        }

        Ok(TaskGraph::new(self.name, self.tasks, &self.task_order))
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        self.task_order.iter().find_map(|id| {
            if visited.contains(id) {
                None
            } else {
                self.dfs_cycle(id, &mut visited, &mut rec_stack, &mut path)
            }
        })
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(task) = self.tasks.get(node) {
            for dep in &task.dependencies {
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RetryPolicy;
    use crate::tasks::NoOpOperation;
    use std::sync::Arc;
    use std::time::Duration;

    fn noop(id: &str, deps: &[&str]) -> Task {
        Task::new(id, Arc::new(NoOpOperation)).with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_builder_creation() {
        let builder = TaskGraphBuilder::new("test");
        assert_eq!(builder.name(), "test");
        assert_eq!(builder.task_count(), 0);
    }

    #[test]
    fn test_dependencies_may_be_declared_before_they_are_added() {
        let graph = TaskGraphBuilder::new("test")
            .task(noop("ingest", &["get_data"]))
            .unwrap()
            .task(noop("get_data", &[]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_missing_dependency() {
        let err = TaskGraphBuilder::new("test")
            .task(noop("ingest", &["get_dta"]))
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.code(), "CONFIG-MISSING-DEP");
        assert!(err.to_string().contains("get_dta"));
    }

    #[test]
    fn test_cycle_detection() {
        let err = TaskGraphBuilder::new("test")
            .task(noop("a", &["c"]))
            .unwrap()
            .task(noop("b", &["a"]))
            .unwrap()
            .task(noop("c", &["b"]))
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.code(), "CONFIG-CYCLE");
        assert_eq!(err.tasks.first(), err.tasks.last());
        assert_eq!(err.tasks.len(), 4);
    }

    #[test]
    fn test_duplicate_task() {
        let err = TaskGraphBuilder::new("test")
            .task(noop("a", &[]))
            .unwrap()
            .task(noop("a", &[]))
            .unwrap_err();

        assert_eq!(err.code(), "CONFIG-DUPLICATE");
    }

    #[test]
    fn test_invalid_retry_policy_rejected_on_add() {
        let task = noop("a", &[]).with_retry_policy(RetryPolicy::new(0, Duration::ZERO));
        let err = TaskGraphBuilder::new("test").task(task).unwrap_err();
        assert_eq!(err.code(), "CONFIG-RETRY");
    }

    #[test]
    fn test_empty_build() {
        let err = TaskGraphBuilder::new("test").build().unwrap_err();
        assert_eq!(err.code(), "CONFIG-EMPTY");
    }
}
