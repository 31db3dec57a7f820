use crate::metrics::WorkerMetrics;
use crate::pool::WorkerPool;
use crate::retry::RetryPolicy;
use notify_queue_broker::QueueSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Single loop moving tasks from the queue set into free pool slots.
pub struct Dispatcher {
    queues: Arc<QueueSet>,
    pool: Arc<WorkerPool>,
    poll_interval: Duration,
    recover_interval: Duration,
    error_backoff: RetryPolicy,
    metrics: WorkerMetrics,
}

impl Dispatcher {
    pub fn new(
        queues: Arc<QueueSet>,
        pool: Arc<WorkerPool>,
        poll_interval: Duration,
        recover_interval: Duration,
        error_backoff: RetryPolicy,
        metrics: WorkerMetrics,
    ) -> Self {
        Dispatcher {
            queues,
            pool,
            poll_interval,
            recover_interval,
            error_backoff,
            metrics,
        }
    }

    /// Run until `stop` fires.
    ///
    /// The stop token is only raced against waits (for a slot, for work, or
    /// an error backoff), never against a claim, so a task that has been
    /// claimed is always handed to the pool.
    pub async fn run(self, stop: CancellationToken) {
        info!(
            concurrency = self.pool.concurrency(),
            "Dispatcher started"
        );

        self.recover().await;
        let mut next_recover = Instant::now() + self.recover_interval;
        let mut consecutive_errors: u32 = 0;

        loop {
            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                permit = self.pool.acquire_slot() => match permit {
                    Some(permit) => permit,
                    None => break,
                },
            };

            if stop.is_cancelled() {
                break;
            }

            if Instant::now() >= next_recover {
                self.recover().await;
                next_recover = Instant::now() + self.recover_interval;
            }

            match self.queues.dequeue().await {
                Ok(Some(task)) => {
                    consecutive_errors = 0;
                    debug!(
                        task_id = %task.id,
                        task_type = %task.task_type,
                        queue = %task.queue,
                        attempt = task.attempt,
                        "Claimed task"
                    );
                    self.pool.spawn(task, permit);
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    drop(permit);

                    let until_recover = next_recover.saturating_duration_since(Instant::now());
                    let wait = self.poll_interval.min(until_recover);
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        _ = self.queues.broker().wait_for_work(wait) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    self.metrics.inc_broker_errors("dequeue");

                    let delay = self.error_backoff.backoff(consecutive_errors);
                    warn!(
                        consecutive_errors,
                        "Dequeue failed, backing off for {:?}: {}", delay, e
                    );
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Dispatcher stopped claiming new tasks");
    }

    async fn recover(&self) {
        let broker = self.queues.broker();
        match broker.recover_expired().await {
            Ok(0) => {}
            Ok(n) => info!("Returned {} expired claims to their queues", n),
            Err(e) => {
                self.metrics.inc_broker_errors("recover_expired");
                error!("Failed to recover expired claims: {}", e);
            }
        }

        match broker.stats().await {
            Ok(stats) => self.metrics.update_broker_stats(&stats),
            Err(e) => debug!("Failed to read broker stats: {}", e),
        }
    }
}
