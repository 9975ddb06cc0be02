//! Validated, acyclic task graph.

use super::Task;
use std::collections::{HashMap, HashSet};

/// A directed acyclic graph of tasks.
///
/// Only [`TaskGraphBuilder`](super::TaskGraphBuilder) constructs graphs, so a
/// `TaskGraph` always has known dependencies and no cycles.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    name: String,
    tasks: HashMap<String, Task>,
    execution_order: Vec<String>,
}

impl TaskGraph {
    pub(super) fn new(name: String, tasks: HashMap<String, Task>, task_order: &[String]) -> Self {
        let execution_order = topological_sort(&tasks, task_order);
        Self {
            name,
            tasks,
            execution_order,
        }
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns a task by id.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Returns a topological order; ties are broken by insertion order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns the ids of all tasks that depend on `id`, directly or transitively.
    #[must_use]
    pub fn downstream_of(&self, id: &str) -> HashSet<String> {
        let mut found = HashSet::new();
        let mut frontier = vec![id.to_string()];

        while let Some(current) = frontier.pop() {
            for task in self.tasks.values() {
                if task.dependencies.contains(&current) && found.insert(task.id.clone()) {
                    frontier.push(task.id.clone());
                }
            }
        }

        found
    }

    /// Consumes the graph, yielding tasks in execution order.
    pub fn into_ordered_tasks(mut self) -> Vec<Task> {
        self.execution_order
            .iter()
            .filter_map(|id| self.tasks.remove(id))
            .collect()
    }
}

/// Depth-first topological sort visiting roots in insertion order.
fn topological_sort(tasks: &HashMap<String, Task>, task_order: &[String]) -> Vec<String> {
    fn visit(
        node: &str,
        tasks: &HashMap<String, Task>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(node.to_string()) {
            return;
        }
        if let Some(task) = tasks.get(node) {
            for dep in &task.dependencies {
                visit(dep, tasks, visited, result);
            }
        }
        result.push(node.to_string());
    }

    let mut result = Vec::with_capacity(tasks.len());
    let mut visited = HashSet::new();
    for id in task_order {
        visit(id, tasks, &mut visited, &mut result);
    }
    result
}

#[cfg(test)]
mod tests {
    use crate::pipeline::{Task, TaskGraph, TaskGraphBuilder};
    use crate::tasks::NoOpOperation;
    use std::sync::Arc;

    fn chain_graph() -> TaskGraph {
        let noop = || Arc::new(NoOpOperation);
        TaskGraphBuilder::new("churn")
            .task(Task::new("transform", noop()).with_dependency("prepare"))
            .unwrap()
            .task(Task::new("prepare", noop()).with_dependency("validate"))
            .unwrap()
            .task(Task::new("validate", noop()).with_dependency("ingest"))
            .unwrap()
            .task(Task::new("ingest", noop()).with_dependencies(["get_data", "start_proc"]))
            .unwrap()
            .task(Task::new("get_data", noop()))
            .unwrap()
            .task(Task::new("start_proc", noop()))
            .unwrap()
            .build()
            .unwrap()
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|n| n == id).unwrap()
    }

    #[test]
    fn test_topological_order() {
        let graph = chain_graph();
        let order = graph.execution_order();

        assert_eq!(order.len(), 6);
        for task in ["get_data", "start_proc", "ingest", "validate", "prepare", "transform"] {
            let task_pos = position(order, task);
            for dep in &graph.task(task).unwrap().dependencies {
                assert!(position(order, dep) < task_pos, "{dep} must precede {task}");
            }
        }
    }

    #[test]
    fn test_downstream_of() {
        let graph = chain_graph();

        let downstream = graph.downstream_of("get_data");
        assert_eq!(downstream.len(), 4);
        assert!(downstream.contains("transform"));
        assert!(!downstream.contains("start_proc"));

        assert!(graph.downstream_of("transform").is_empty());
    }

    #[test]
    fn test_into_ordered_tasks() {
        let tasks = chain_graph().into_ordered_tasks();
        assert_eq!(tasks.len(), 6);
        assert_eq!(tasks.last().map(|t| t.id.as_str()), Some("transform"));
    }
}
