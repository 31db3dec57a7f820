pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod executor;
pub mod handler;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod shutdown;
pub mod worker;

pub use config::{LogFormat, LoggingConfig, RetryConfig, WorkerConfig};
pub use delivery::{register_notification_handlers, LogNotifier, NotificationHandler, Notifier};
pub use executor::{ExecutionOutcome, TaskExecutor};
pub use handler::{handler_fn, HandlerError, HandlerRegistry, RegistryError, TaskContext, TaskHandler};
pub use metrics::WorkerMetrics;
pub use retry::{FailureKind, RetryDecision, RetryPolicy};
pub use shutdown::{
    HealthHandle, LifecycleState, ShutdownCoordinator, StopReport, FORCE_STOP_BOUND,
};
pub use worker::{Worker, WorkerError};
