use async_trait::async_trait;
use notify_queue_core::{Task, TaskId, TaskType};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// What a handler sees of the execution it is running in
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub attempt: u32,
    pub max_retries: u32,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(task: &Task, cancel: CancellationToken) -> Self {
        TaskContext {
            task_id: task.id,
            attempt: task.attempt,
            max_retries: task.max_retries,
            cancel,
        }
    }

    /// Set once the worker is force-stopping. Long-running handlers should
    /// check this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// Failure reported by a handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Recoverable: the task is retried while its budget lasts
    #[error("{0}")]
    Retryable(String),

    /// Unrecoverable: the task fails permanently without consulting the
    /// retry budget
    #[error("skip retry: {0}")]
    SkipRetry(String),
}

impl HandlerError {
    pub fn retryable(msg: impl fmt::Display) -> Self {
        HandlerError::Retryable(msg.to_string())
    }

    pub fn skip_retry(msg: impl fmt::Display) -> Self {
        HandlerError::SkipRetry(msg.to_string())
    }
}

/// Executes tasks of one type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, task: &Task) -> Result<(), HandlerError>;
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Handler already registered for task type {0}")]
    DuplicateHandler(TaskType),

    #[error("Task type must not be empty")]
    EmptyTaskType,
}

/// Registry of task handlers by task type.
///
/// Filled before the worker starts and read-only afterwards.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a task type. Each type takes exactly one.
    pub fn register<H: TaskHandler + 'static>(
        &mut self,
        task_type: impl Into<TaskType>,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.register_arc(task_type, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        task_type: impl Into<TaskType>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        let task_type = task_type.into();
        if task_type.is_empty() {
            return Err(RegistryError::EmptyTaskType);
        }
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn has_handler(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered task types, sorted
    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Handler backed by an async closure
pub struct FnHandler<F> {
    f: F,
}

/// Adapt `async |ctx, task| -> Result<(), HandlerError>` into a handler
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(TaskContext, Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext, Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: &TaskContext, task: &Task) -> Result<(), HandlerError> {
        (self.f)(ctx.clone(), task.clone()).await
    }
}
