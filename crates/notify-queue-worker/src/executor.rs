use crate::handler::{HandlerError, TaskContext, TaskHandler};
use notify_queue_core::Task;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How a single execution attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    /// Recoverable handler error (or a panic)
    Failed(String),
    /// The task's deadline elapsed first
    TimedOut(Duration),
    /// Handler asked not to be retried
    Rejected(String),
    /// Force-stopped by shutdown; no outcome reaches the broker
    Cancelled,
}

impl ExecutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Succeeded => "succeeded",
            ExecutionOutcome::Failed(_) => "failed",
            ExecutionOutcome::TimedOut(_) => "timed_out",
            ExecutionOutcome::Rejected(_) => "rejected",
            ExecutionOutcome::Cancelled => "cancelled",
        }
    }
}

/// Task executor with timeout and cancellation support
pub struct TaskExecutor {
    handler: Arc<dyn TaskHandler>,
}

impl TaskExecutor {
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        TaskExecutor { handler }
    }

    /// Run the handler once under the task's deadline.
    ///
    /// The handler runs on its own tokio task so a panic is caught and
    /// reported as a failure instead of taking the worker down.
    pub async fn execute(&self, task: &Task, cancel: CancellationToken) -> ExecutionOutcome {
        let deadline = task.timeout;
        let ctx = TaskContext::new(task, cancel.clone());
        let handler = self.handler.clone();
        let owned = task.clone();

        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            attempt = task.attempt,
            "Executing task with timeout {:?}",
            deadline
        );

        let mut join = tokio::spawn(async move { handler.handle(&ctx, &owned).await });
        let abort = join.abort_handle();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                abort.abort();
                warn!(task_id = %task.id, "Task execution cancelled");
                ExecutionOutcome::Cancelled
            }

            result = tokio::time::timeout(deadline, &mut join) => match result {
                Ok(Ok(Ok(()))) => ExecutionOutcome::Succeeded,
                Ok(Ok(Err(HandlerError::Retryable(msg)))) => ExecutionOutcome::Failed(msg),
                Ok(Ok(Err(HandlerError::SkipRetry(msg)))) => ExecutionOutcome::Rejected(msg),
                Ok(Err(e)) if e.is_panic() => {
                    error!(task_id = %task.id, "Task panicked during execution");
                    ExecutionOutcome::Failed("handler panicked".to_string())
                }
                Ok(Err(_)) => ExecutionOutcome::Failed("handler was aborted".to_string()),
                Err(_) => {
                    abort.abort();
                    ExecutionOutcome::TimedOut(deadline)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use notify_queue_core::{Priority, TaskType};

    fn task_with_timeout(secs: u64) -> Task {
        let mut task = Task::builder(TaskType::email(), b"{}".to_vec())
            .priority(Priority::High)
            .timeout(Duration::from_secs(secs))
            .build()
            .unwrap();
        task.claim().unwrap();
        task
    }

    fn executor<F, Fut>(f: F) -> TaskExecutor
    where
        F: Fn(TaskContext, Task) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        TaskExecutor::new(Arc::new(handler_fn(f)))
    }

    #[tokio::test]
    async fn test_executor_success() {
        let exec = executor(|_, _| async { Ok(()) });
        let outcome = exec.execute(&task_with_timeout(5), CancellationToken::new()).await;
        assert_eq!(outcome, ExecutionOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_handler_errors_map_to_outcomes() {
        let failing = executor(|_, _| async { Err(HandlerError::retryable("smtp 451")) });
        assert_eq!(
            failing.execute(&task_with_timeout(5), CancellationToken::new()).await,
            ExecutionOutcome::Failed("smtp 451".to_string())
        );

        let rejecting = executor(|_, _| async { Err(HandlerError::skip_retry("bad json")) });
        assert_eq!(
            rejecting.execute(&task_with_timeout(5), CancellationToken::new()).await,
            ExecutionOutcome::Rejected("bad json".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_timeout() {
        let exec = executor(|_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let outcome = exec.execute(&task_with_timeout(1), CancellationToken::new()).await;
        assert_eq!(outcome, ExecutionOutcome::TimedOut(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_failure() {
        let exec = executor(|_, task: Task| async move {
            if task.attempt > 0 {
                panic!("handler bug");
            }
            Ok(())
        });

        let outcome = exec.execute(&task_with_timeout(5), CancellationToken::new()).await;
        assert_eq!(outcome, ExecutionOutcome::Failed("handler panicked".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_execution() {
        let exec = executor(|_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let outcome = exec.execute(&task_with_timeout(30), cancel).await;
        assert_eq!(outcome, ExecutionOutcome::Cancelled);
    }
}
