//! Task operations.
//!
//! An operation is the opaque unit of work a task wraps. The engine only
//! observes success or a typed [`OperationError`]; what the operation does
//! (generate data, call an API, train a model) is its own business.

mod command;

pub use command::CommandOperation;
pub(crate) use command::forward_lines;

use crate::context::TaskContext;
use crate::errors::OperationError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Trait for task operations.
///
/// Operations may be invoked more than once when a retry policy allows it,
/// so they should be safe to re-run from scratch.
#[async_trait]
pub trait TaskOperation: Send + Sync + Debug {
    /// Executes one attempt of the operation.
    async fn execute(&self, ctx: &TaskContext) -> Result<(), OperationError>;
}

/// An async function-based operation.
pub struct FnOperation<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), OperationError>> + Send,
{
    label: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnOperation<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), OperationError>> + Send,
{
    /// Creates a new function-based operation.
    pub fn new(label: impl Into<String>, func: F) -> Self {
        Self {
            label: label.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnOperation<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), OperationError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnOperation")
            .field("label", &self.label)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> TaskOperation for FnOperation<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), OperationError>> + Send,
{
    async fn execute(&self, ctx: &TaskContext) -> Result<(), OperationError> {
        (self.func)(ctx.clone()).await
    }
}

/// Wraps an async closure as a shareable operation.
pub fn operation_fn<F, Fut>(label: impl Into<String>, func: F) -> Arc<dyn TaskOperation>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
{
    Arc::new(FnOperation::new(label, func))
}

/// An operation that always succeeds immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpOperation;

#[async_trait]
impl TaskOperation for NoOpOperation {
    async fn execute(&self, _ctx: &TaskContext) -> Result<(), OperationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunContext, RunIdentity};

    fn test_task_context() -> TaskContext {
        let run = Arc::new(RunContext::new(RunIdentity::new("test")));
        TaskContext::new(run, "test", 1)
    }

    #[tokio::test]
    async fn test_fn_operation() {
        let op = operation_fn("double-check", |ctx: TaskContext| async move {
            if ctx.attempt() == 1 {
                Ok(())
            } else {
                Err(OperationError::transient("unexpected attempt"))
            }
        });

        assert!(op.execute(&test_task_context()).await.is_ok());
        assert!(format!("{op:?}").contains("double-check"));
    }

    #[tokio::test]
    async fn test_noop_operation() {
        assert!(NoOpOperation.execute(&test_task_context()).await.is_ok());
    }
}
