use crate::config::WorkerConfig;
use crate::executor::{ExecutionOutcome, TaskExecutor};
use crate::handler::HandlerRegistry;
use crate::metrics::WorkerMetrics;
use crate::retry::{FailureKind, RetryDecision, RetryPolicy};
use dashmap::{DashMap, DashSet};
use notify_queue_broker::{Broker, BrokerError};
use notify_queue_core::{Task, TaskId};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Fixed number of execution slots.
///
/// Every claimed task runs on the pool's tracker while holding one permit,
/// and its outcome is reported back to the broker before the permit is
/// released.
pub struct WorkerPool {
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    retry: RetryPolicy,
    broker_retry: RetryPolicy,
    broker_max_attempts: u32,
    broker_call_timeout: Duration,
    metrics: WorkerMetrics,
    concurrency: usize,
    slots: Arc<Semaphore>,
    in_flight: DashMap<TaskId, CancellationToken>,
    /// Executions that finished and are still reporting to the broker
    reporting: DashSet<TaskId>,
    tracker: TaskTracker,
}

impl WorkerPool {
    pub fn new(
        config: &WorkerConfig,
        broker: Arc<dyn Broker>,
        registry: Arc<HandlerRegistry>,
        metrics: WorkerMetrics,
    ) -> Self {
        WorkerPool {
            broker,
            registry,
            retry: config.retry_policy(),
            broker_retry: config.broker_retry_policy(),
            broker_max_attempts: config.retry.broker_max_attempts,
            broker_call_timeout: config.broker_call_timeout(),
            metrics,
            concurrency: config.concurrency,
            slots: Arc::new(Semaphore::new(config.concurrency)),
            in_flight: DashMap::new(),
            reporting: DashSet::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Number of tasks currently executing
    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free execution slot
    pub async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().acquire_owned().await.ok()
    }

    /// Run a claimed task in the slot held by `permit`
    pub fn spawn(self: &Arc<Self>, task: Task, permit: OwnedSemaphorePermit) {
        let cancel = CancellationToken::new();
        self.in_flight.insert(task.id, cancel.clone());
        self.metrics.tasks_in_flight.inc();

        let pool = self.clone();
        self.tracker.spawn(async move {
            let task_id = task.id;
            pool.run(task, cancel).await;
            pool.reporting.remove(&task_id);
            pool.metrics.tasks_in_flight.dec();
            drop(permit);
        });
    }

    async fn run(&self, task: Task, cancel: CancellationToken) {
        let started = Instant::now();

        let outcome = match self.registry.get(&task.task_type) {
            Some(handler) => TaskExecutor::new(handler).execute(&task, cancel).await,
            None => {
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    "No handler registered for task type; this is a configuration defect"
                );
                self.settle(&task.id);
                self.metrics.record_outcome(
                    "unroutable",
                    task.task_type.as_str(),
                    started.elapsed().as_secs_f64(),
                );
                self.resolve_failure(&task, FailureKind::Unroutable).await;
                return;
            }
        };

        self.settle(&task.id);
        self.metrics.record_outcome(
            outcome.label(),
            task.task_type.as_str(),
            started.elapsed().as_secs_f64(),
        );

        match outcome {
            ExecutionOutcome::Succeeded => {
                info!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt = task.attempt,
                    "Task succeeded"
                );
                let acked = self
                    .with_broker_retry("ack", || self.broker.ack(&task.id))
                    .await;
                if acked == Some(false) {
                    warn!(task_id = %task.id, "Ack ignored: claim no longer held");
                }
            }
            ExecutionOutcome::Failed(msg) => {
                self.resolve_failure(&task, FailureKind::Error(msg)).await
            }
            ExecutionOutcome::TimedOut(d) => {
                self.resolve_failure(&task, FailureKind::Timeout(d)).await
            }
            ExecutionOutcome::Rejected(msg) => {
                self.resolve_failure(&task, FailureKind::SkipRetry(msg)).await
            }
            ExecutionOutcome::Cancelled => {
                // Never acked, so the broker redelivers it once the lease lapses
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt = task.attempt,
                    "Task abandoned by forced shutdown"
                );
            }
        }
    }

    fn settle(&self, task_id: &TaskId) {
        self.reporting.insert(*task_id);
        self.in_flight.remove(task_id);
    }

    async fn resolve_failure(&self, task: &Task, failure: FailureKind) {
        let message = failure.message(task);

        let applied = match self.retry.decide(task, &failure) {
            RetryDecision::Retry { delay } => {
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt = task.attempt,
                    max_retries = task.max_retries,
                    "Task failed, retrying in {:?}: {}",
                    delay,
                    message
                );
                self.with_broker_retry("requeue", || {
                    self.broker.requeue(&task.id, delay, &message)
                })
                .await
            }
            RetryDecision::DeadLetter { reason } => {
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt = task.attempt,
                    "Task failed permanently: {}",
                    reason
                );
                self.with_broker_retry("dead_letter", || {
                    self.broker.dead_letter(&task.id, &reason)
                })
                .await
            }
        };

        if applied == Some(false) {
            warn!(task_id = %task.id, "Failure report ignored: claim no longer held");
        }
    }

    /// Retry a broker operation with capped backoff.
    ///
    /// Each call is bounded by the broker call timeout, and a call that
    /// times out counts as a failed attempt. Gives up after the configured
    /// number of attempts; the task's lease then expires and the broker
    /// redelivers it.
    async fn with_broker_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        for attempt in 1..=self.broker_max_attempts {
            let result = match tokio::time::timeout(self.broker_call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(BrokerError::Unavailable(format!(
                    "{} timed out after {:?}",
                    operation, self.broker_call_timeout
                ))),
            };
            match result {
                Ok(value) => return Some(value),
                Err(e) => {
                    self.metrics.inc_broker_errors(operation);
                    if attempt == self.broker_max_attempts {
                        error!(
                            "Broker {} failed after {} attempts: {}",
                            operation, attempt, e
                        );
                        break;
                    }
                    let delay = self.broker_retry.backoff(attempt);
                    warn!("Broker {} failed, retrying in {:?}: {}", operation, delay, e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        None
    }

    /// Cancel every execution still running. Returns the signalled tasks.
    pub fn cancel_all(&self) -> Vec<TaskId> {
        let cancelled: Vec<TaskId> = self
            .in_flight
            .iter()
            .map(|entry| {
                entry.value().cancel();
                *entry.key()
            })
            .collect();
        if !cancelled.is_empty() {
            debug!("Cancelled {} in-flight tasks", cancelled.len());
        }
        cancelled
    }

    /// Tasks whose execution finished but whose outcome has not yet been
    /// recorded by the broker
    pub fn unreported(&self) -> Vec<TaskId> {
        self.reporting.iter().map(|id| *id).collect()
    }

    /// Wait until every spawned execution has reported its outcome.
    /// No new tasks may be spawned afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
