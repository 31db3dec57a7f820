use clap::Parser;
use notify_queue_broker::{Broker, InMemoryBroker};
use notify_queue_client::NotificationClient;
use notify_queue_core::notification::{
    EmailNotification, PushNotification, SmsNotification, WebhookNotification,
};
use notify_queue_worker::{
    register_notification_handlers, HandlerRegistry, LogFormat, LogNotifier, LoggingConfig,
    Worker, WorkerConfig,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "nq-worker")]
#[command(about = "Notification task worker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Number of concurrent tasks
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Enqueue this many sample notifications after startup
    #[arg(long, value_name = "N")]
    demo: Option<usize>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(false)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
    }
}

async fn enqueue_demo(client: &NotificationClient, count: usize) {
    const PRIORITIES: [&str; 3] = ["high", "", "low"];

    let mut accepted = 0;
    for i in 0..count {
        let priority = PRIORITIES[i % PRIORITIES.len()].to_string();
        let user_id = format!("demo-user-{}", i);

        let result = match i % 4 {
            0 => {
                client
                    .enqueue_email(&EmailNotification {
                        to: format!("user{}@example.com", i),
                        subject: "Welcome aboard".to_string(),
                        body: "Thanks for signing up".to_string(),
                        template_id: Some("welcome".to_string()),
                        data: BTreeMap::new(),
                        priority,
                        user_id,
                    })
                    .await
            }
            1 => {
                client
                    .enqueue_sms(&SmsNotification {
                        to: format!("+1555010{:04}", i),
                        message: "Your verification code is 123456".to_string(),
                        priority,
                        user_id,
                    })
                    .await
            }
            2 => {
                client
                    .enqueue_push(&PushNotification {
                        device_token: format!("device-{}", i),
                        title: "Order shipped".to_string(),
                        body: "Your order is on its way".to_string(),
                        data: BTreeMap::new(),
                        priority,
                        user_id,
                    })
                    .await
            }
            _ => {
                client
                    .enqueue_webhook(&WebhookNotification {
                        url: "https://hooks.example.com/orders".to_string(),
                        method: "POST".to_string(),
                        headers: BTreeMap::new(),
                        body: serde_json::json!({ "event": "order.shipped", "seq": i }),
                        priority,
                        user_id,
                    })
                    .await
            }
        };

        match result {
            Ok(_) => accepted += 1,
            Err(e) => warn!("Demo notification rejected: {}", e),
        }
    }

    info!("Enqueued {}/{} demo notifications", accepted, count);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };

    // Override with CLI args
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }

    init_tracing(&config.logging);

    let broker = Arc::new(
        InMemoryBroker::from_config(&config.queues).with_lease_grace(config.lease_grace()),
    );

    let mut registry = HandlerRegistry::new();
    register_notification_handlers(&mut registry, Arc::new(LogNotifier::with_simulated_latency()))?;

    let worker = Worker::new(config, broker.clone(), registry)?;
    worker.start().await?;

    if let Some(count) = args.demo {
        let client = NotificationClient::new(broker.clone()).with_health(worker.health().subscribe());
        enqueue_demo(&client, count).await;
    }

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let report = worker.stop().await;
    info!(?report, "Worker stopped");

    let stats = broker.stats().await?;
    worker.metrics().update_broker_stats(&stats);
    info!(
        pending = stats.pending_total(),
        scheduled = stats.scheduled,
        active = stats.active,
        succeeded = stats.succeeded,
        dead = stats.dead,
        "Final broker state"
    );
    info!("Metrics summary:\n{}", worker.metrics().render());

    Ok(())
}
