use async_trait::async_trait;
use notify_queue_core::{Task, TaskError, TaskId};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Task already exists: {0}")]
    TaskAlreadyExists(TaskId),

    #[error("Only pending tasks can be enqueued (task {0})")]
    NotPending(TaskId),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Task record error: {0}")]
    Task(#[from] TaskError),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Point-in-time view of the broker's contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Pending records per queue
    pub pending: BTreeMap<String, usize>,
    /// Tasks waiting out a retry backoff
    pub scheduled: usize,
    /// Tasks currently claimed by a worker
    pub active: usize,
    /// Tasks acked since the broker started
    pub succeeded: u64,
    /// Tasks held in the dead-letter record
    pub dead: usize,
}

impl BrokerStats {
    pub fn pending_total(&self) -> usize {
        self.pending.values().sum()
    }
}

/// Durable queue storage shared by producers and workers.
///
/// Every method is a single atomic operation on the broker's state: a task
/// handed out by `claim` is invisible to every other caller until it is
/// acked, requeued, dead-lettered or its lease expires. `ack`, `requeue` and
/// `dead_letter` return `false` when the task holds no active claim, so
/// repeating them is harmless.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Liveness check used at startup
    async fn ping(&self) -> Result<()>;

    /// Append a pending task to the tail of its queue
    async fn enqueue(&self, task: &Task) -> Result<()>;

    /// Claim the head of `queue`: the returned task is `Active` with its
    /// attempt counter already incremented.
    async fn claim(&self, queue: &str) -> Result<Option<Task>>;

    /// Remove a successfully executed task
    async fn ack(&self, task_id: &TaskId) -> Result<bool>;

    /// Schedule a failed task to reappear at the tail of its original
    /// queue once `delay` has elapsed.
    async fn requeue(&self, task_id: &TaskId, delay: Duration, error: &str) -> Result<bool>;

    /// Move a task to the dead-letter record; it is never redelivered
    async fn dead_letter(&self, task_id: &TaskId, error: &str) -> Result<bool>;

    /// Return claims whose lease elapsed without an outcome to their queue
    async fn recover_expired(&self) -> Result<usize>;

    /// Suspend until work may be available or `max_wait` elapses.
    ///
    /// Brokers without a wake-up channel fall back to plain polling.
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }

    async fn stats(&self) -> Result<BrokerStats>;
}
