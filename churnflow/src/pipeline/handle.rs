//! Handles returned by task submission.

use crate::core::TaskStatus;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;

/// A cloneable future-like handle to a submitted task.
///
/// Resolves to `Succeeded` or `Failed` once the task (including all of its
/// retries) has finished, or once it was skipped.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: String,
    rx: watch::Receiver<TaskStatus>,
}

impl TaskHandle {
    pub(super) fn new(id: impl Into<String>, rx: watch::Receiver<TaskStatus>) -> Self {
        Self { id: id.into(), rx }
    }

    /// Returns the task id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the current status without waiting.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        *self.rx.borrow()
    }

    /// Waits until the task reaches a terminal status.
    ///
    /// A handle whose task vanished without resolving reports `Failed`.
    pub async fn wait(&self) -> TaskStatus {
        let mut rx = self.rx.clone();
        let resolved = rx.wait_for(TaskStatus::is_terminal).await.map(|s| *s);
        resolved.unwrap_or(TaskStatus::Failed)
    }
}

/// Waits for every handle to succeed.
///
/// Returns the id of the first handle observed to fail, without waiting for
/// the remaining ones, or `None` when all of them succeeded.
pub async fn first_failed(handles: &[TaskHandle]) -> Option<String> {
    let mut pending: FuturesUnordered<_> = handles
        .iter()
        .map(|h| async move { (h.id(), h.wait().await) })
        .collect();

    while let Some((id, status)) = pending.next().await {
        if status != TaskStatus::Succeeded {
            return Some(id.to_string());
        }
    }
    None
}
