use notify_queue_broker::BrokerStats;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Prometheus metrics for the worker
#[derive(Clone)]
pub struct WorkerMetrics {
    pub registry: Registry,

    // Outcomes by type
    pub tasks_total: IntCounterVec,

    pub tasks_in_flight: IntGauge,

    pub task_duration: HistogramVec,

    // Broker-side view
    pub queue_depth: IntGaugeVec,
    pub tasks_scheduled: IntGauge,
    pub tasks_dead: IntGauge,

    pub broker_errors_total: IntCounterVec,
}

impl WorkerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tasks_total = IntCounterVec::new(
            Opts::new("nq_tasks_total", "Executed tasks by outcome and type"),
            &["outcome", "task_type"],
        )?;
        registry.register(Box::new(tasks_total.clone()))?;

        let tasks_in_flight =
            IntGauge::new("nq_tasks_in_flight", "Tasks currently executing on this worker")?;
        registry.register(Box::new(tasks_in_flight.clone()))?;

        let task_duration = HistogramVec::new(
            HistogramOpts::new(
                "nq_task_duration_seconds",
                "Handler execution time in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]),
            &["task_type"],
        )?;
        registry.register(Box::new(task_duration.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("nq_queue_depth", "Pending tasks per queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let tasks_scheduled =
            IntGauge::new("nq_tasks_scheduled", "Tasks waiting out a retry backoff")?;
        registry.register(Box::new(tasks_scheduled.clone()))?;

        let tasks_dead = IntGauge::new("nq_tasks_dead", "Tasks in the dead-letter record")?;
        registry.register(Box::new(tasks_dead.clone()))?;

        let broker_errors_total = IntCounterVec::new(
            Opts::new("nq_broker_errors_total", "Failed broker operations"),
            &["operation"],
        )?;
        registry.register(Box::new(broker_errors_total.clone()))?;

        Ok(WorkerMetrics {
            registry,
            tasks_total,
            tasks_in_flight,
            task_duration,
            queue_depth,
            tasks_scheduled,
            tasks_dead,
            broker_errors_total,
        })
    }

    pub fn record_outcome(&self, outcome: &str, task_type: &str, duration_secs: f64) {
        self.tasks_total
            .with_label_values(&[outcome, task_type])
            .inc();
        self.task_duration
            .with_label_values(&[task_type])
            .observe(duration_secs);
    }

    pub fn outcome_count(&self, outcome: &str, task_type: &str) -> u64 {
        self.tasks_total
            .with_label_values(&[outcome, task_type])
            .get()
    }

    pub fn inc_broker_errors(&self, operation: &str) {
        self.broker_errors_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn update_broker_stats(&self, stats: &BrokerStats) {
        for (queue, depth) in &stats.pending {
            self.queue_depth
                .with_label_values(&[queue.as_str()])
                .set(*depth as i64);
        }
        self.tasks_scheduled.set(stats.scheduled as i64);
        self.tasks_dead.set(stats.dead as i64);
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
