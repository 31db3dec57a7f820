use crate::config::WorkerConfig;
use crate::dispatcher::Dispatcher;
use crate::handler::HandlerRegistry;
use crate::metrics::WorkerMetrics;
use crate::pool::WorkerPool;
use crate::shutdown::{HealthHandle, LifecycleState, ShutdownCoordinator, StopReport};
use notify_queue_broker::{Broker, BrokerError, ConfigError, QueueSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("No task handlers registered")]
    NoHandlers,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker unavailable at startup: {0}")]
    BrokerUnavailable(#[source] BrokerError),

    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Worker cannot be started from state {0}")]
    InvalidState(LifecycleState),
}

/// Worker process that executes tasks
pub struct Worker {
    worker_id: String,
    config: WorkerConfig,
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    queues: Arc<QueueSet>,
    pool: Arc<WorkerPool>,
    coordinator: ShutdownCoordinator,
    metrics: WorkerMetrics,
}

impl Worker {
    /// Assemble a worker. Handlers must all be registered at this point.
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn Broker>,
        registry: HandlerRegistry,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        if registry.is_empty() {
            return Err(WorkerError::NoHandlers);
        }

        let worker_id = config.generate_worker_id();
        let metrics = WorkerMetrics::new()?;
        let registry = Arc::new(registry);
        let queues = Arc::new(QueueSet::new(config.queues.clone(), broker.clone())?);
        let pool = Arc::new(WorkerPool::new(
            &config,
            broker.clone(),
            registry.clone(),
            metrics.clone(),
        ));
        let coordinator = ShutdownCoordinator::new(config.graceful_shutdown_timeout());

        Ok(Worker {
            worker_id,
            config,
            broker,
            registry,
            queues,
            pool,
            coordinator,
            metrics,
        })
    }

    /// Check the broker and start dispatching.
    pub async fn start(&self) -> Result<(), WorkerError> {
        let state = self.coordinator.state();
        if state != LifecycleState::Idle {
            return Err(WorkerError::InvalidState(state));
        }

        self.broker
            .ping()
            .await
            .map_err(WorkerError::BrokerUnavailable)?;

        let dispatcher = Dispatcher::new(
            self.queues.clone(),
            self.pool.clone(),
            self.config.poll_interval(),
            self.config.recover_interval(),
            self.config.broker_retry_policy(),
            self.metrics.clone(),
        );

        let launched = self
            .coordinator
            .launch(self.pool.clone(), |stop| tokio::spawn(dispatcher.run(stop)));
        if !launched {
            return Err(WorkerError::InvalidState(self.coordinator.state()));
        }

        info!(
            worker_id = %self.worker_id,
            concurrency = self.config.concurrency,
            task_types = ?self.registry.task_types(),
            "Worker started"
        );
        Ok(())
    }

    /// Drain in-flight work within the grace period and stop.
    pub async fn stop(&self) -> StopReport {
        info!(worker_id = %self.worker_id, "Stopping worker");
        self.coordinator.stop().await
    }

    pub fn request_shutdown(&self) {
        self.coordinator.request_shutdown();
    }

    pub fn is_accepting(&self) -> bool {
        self.coordinator.is_accepting()
    }

    pub fn health(&self) -> HealthHandle {
        self.coordinator.health()
    }

    pub fn state(&self) -> LifecycleState {
        self.coordinator.state()
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use async_trait::async_trait;
    use notify_queue_broker::{BrokerStats, InMemoryBroker};
    use notify_queue_core::{Task, TaskId, TaskType};
    use std::time::Duration;

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry
            .register(TaskType::email(), handler_fn(|_, _| async { Ok(()) }))
            .unwrap();
        registry
    }

    fn broker() -> Arc<dyn Broker> {
        Arc::new(InMemoryBroker::from_config(&WorkerConfig::default().queues))
    }

    struct DownBroker;

    #[async_trait]
    impl Broker for DownBroker {
        async fn ping(&self) -> notify_queue_broker::Result<()> {
            Err(BrokerError::Unavailable("connection refused".to_string()))
        }
        async fn enqueue(&self, _: &Task) -> notify_queue_broker::Result<()> {
            unreachable!()
        }
        async fn claim(&self, _: &str) -> notify_queue_broker::Result<Option<Task>> {
            unreachable!()
        }
        async fn ack(&self, _: &TaskId) -> notify_queue_broker::Result<bool> {
            unreachable!()
        }
        async fn requeue(&self, _: &TaskId, _: Duration, _: &str) -> notify_queue_broker::Result<bool> {
            unreachable!()
        }
        async fn dead_letter(&self, _: &TaskId, _: &str) -> notify_queue_broker::Result<bool> {
            unreachable!()
        }
        async fn recover_expired(&self) -> notify_queue_broker::Result<usize> {
            unreachable!()
        }
        async fn stats(&self) -> notify_queue_broker::Result<BrokerStats> {
            unreachable!()
        }
    }

    #[test]
    fn test_no_handlers_fails_fast() {
        let result = Worker::new(WorkerConfig::default(), broker(), HandlerRegistry::new());
        assert!(matches!(result, Err(WorkerError::NoHandlers)));
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let config = WorkerConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            Worker::new(config, broker(), registry()),
            Err(WorkerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_start() {
        let worker = Worker::new(WorkerConfig::default(), Arc::new(DownBroker), registry()).unwrap();
        assert!(matches!(
            worker.start().await,
            Err(WorkerError::BrokerUnavailable(_))
        ));
        assert_eq!(worker.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let worker = Worker::new(WorkerConfig::embedded(), broker(), registry()).unwrap();
        worker.start().await.unwrap();
        assert_eq!(worker.state(), LifecycleState::Running);
        assert!(matches!(
            worker.start().await,
            Err(WorkerError::InvalidState(LifecycleState::Running))
        ));

        assert!(matches!(worker.stop().await, StopReport::Drained { .. }));
        assert!(!worker.is_accepting());
        assert_eq!(worker.stop().await, StopReport::NotRunning);
    }
}
