//! Producer-side API for submitting notification tasks.
//!
//! Enqueueing is fire-and-forget: a call returns as soon as the broker has
//! accepted the task, and delivery outcomes are only visible through the
//! worker's logs and metrics.

use notify_queue_broker::{Broker, BrokerError};
use notify_queue_core::notification::{
    BulkItem, BulkNotification, EmailNotification, Notification, PushNotification,
    SmsNotification, WebhookNotification,
};
use notify_queue_core::{Priority, Task, TaskError, TaskId, TaskPayload, TaskType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Validation error: {0}")]
    Validation(#[from] TaskError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Not accepting work: shutdown in progress")]
    NotAccepting,
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Outcome counts of a bulk request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub total: usize,
    pub success: usize,
    pub errors: usize,
}

/// Client for enqueueing notification tasks
#[derive(Clone)]
pub struct NotificationClient {
    broker: Arc<dyn Broker>,
    health: Option<watch::Receiver<bool>>,
}

impl NotificationClient {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        NotificationClient {
            broker,
            health: None,
        }
    }

    /// Reject new work once the attached "accepting" signal turns false
    pub fn with_health(mut self, accepting: watch::Receiver<bool>) -> Self {
        self.health = Some(accepting);
        self
    }

    pub fn is_accepting(&self) -> bool {
        self.health.as_ref().map_or(true, |rx| *rx.borrow())
    }

    /// Enqueue a task of any type
    pub async fn enqueue(
        &self,
        task_type: impl Into<TaskType>,
        payload: TaskPayload,
        priority: Priority,
        metadata: BTreeMap<String, String>,
    ) -> Result<TaskId> {
        let task = Task::builder(task_type, payload)
            .priority(priority)
            .extend_metadata(metadata)
            .build()?;
        self.submit(task).await
    }

    /// Enqueue a prepared task
    pub async fn submit(&self, task: Task) -> Result<TaskId> {
        if !self.is_accepting() {
            return Err(ClientError::NotAccepting);
        }

        self.broker.enqueue(&task).await?;
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            queue = %task.queue,
            "Enqueued task"
        );
        Ok(task.id)
    }

    /// Validate and enqueue a typed notification
    pub async fn enqueue_notification<N: Notification>(&self, notification: &N) -> Result<TaskId> {
        notification.validate()?;
        let payload = serde_json::to_vec(notification).map_err(TaskError::from)?;
        let task = Task::builder(N::task_type(), payload)
            .priority(notification.priority())
            .metadata("user_id", notification.user_id())
            .build()?;
        self.submit(task).await
    }

    pub async fn enqueue_email(&self, email: &EmailNotification) -> Result<TaskId> {
        self.enqueue_notification(email).await
    }

    pub async fn enqueue_sms(&self, sms: &SmsNotification) -> Result<TaskId> {
        self.enqueue_notification(sms).await
    }

    pub async fn enqueue_push(&self, push: &PushNotification) -> Result<TaskId> {
        self.enqueue_notification(push).await
    }

    pub async fn enqueue_webhook(&self, webhook: &WebhookNotification) -> Result<TaskId> {
        self.enqueue_notification(&webhook.clone().normalized()).await
    }

    /// Enqueue one task per recipient.
    ///
    /// Recipients are submitted independently: failures are counted in the
    /// summary and never roll back the ones already accepted.
    pub async fn enqueue_bulk(&self, bulk: &BulkNotification) -> Result<BulkSummary> {
        bulk.validate()?;

        let items = bulk.items();
        let mut summary = BulkSummary {
            total: items.len(),
            ..Default::default()
        };

        for item in &items {
            let result = match item {
                BulkItem::Email(email) => self.enqueue_email(email).await,
                BulkItem::Sms(sms) => self.enqueue_sms(sms).await,
                BulkItem::Push(push) => self.enqueue_push(push).await,
                BulkItem::Webhook(webhook) => self.enqueue_webhook(webhook).await,
            };
            match result {
                Ok(_) => summary.success += 1,
                Err(e) => {
                    warn!(kind = %bulk.kind, "Bulk recipient rejected: {}", e);
                    summary.errors += 1;
                }
            }
        }

        info!(
            kind = %bulk.kind,
            total = summary.total,
            success = summary.success,
            errors = summary.errors,
            "Bulk notification queued"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_queue_broker::InMemoryBroker;
    use notify_queue_core::notification::NotificationKind;
    use notify_queue_core::TaskState;

    fn setup() -> (Arc<InMemoryBroker>, NotificationClient) {
        let broker = Arc::new(InMemoryBroker::new(["critical", "default", "low"]));
        let client = NotificationClient::new(broker.clone());
        (broker, client)
    }

    fn email(to: &str, priority: &str) -> EmailNotification {
        EmailNotification {
            to: to.to_string(),
            subject: "Order shipped".to_string(),
            body: "Your order is on its way".to_string(),
            template_id: None,
            data: BTreeMap::new(),
            priority: priority.to_string(),
            user_id: "user-42".to_string(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_email_routes_by_priority() {
        let (broker, client) = setup();
        let id = client.enqueue_email(&email("ada@example.com", "high")).await.unwrap();

        let pending = broker.pending_tasks("critical").unwrap();
        assert_eq!(pending.len(), 1);
        let task = &pending[0];
        assert_eq!(task.id, id);
        assert_eq!(task.task_type, TaskType::email());
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.metadata.get("user_id").map(String::as_str), Some("user-42"));

        let decoded: EmailNotification = serde_json::from_slice(&task.payload).unwrap();
        assert_eq!(decoded.to, "ada@example.com");
    }

    #[tokio::test]
    async fn test_invalid_notification_never_enters_queue() {
        let (broker, client) = setup();
        let result = client.enqueue_email(&email("nobody", "")).await;

        assert!(matches!(result, Err(ClientError::Validation(_))));
        assert_eq!(broker.stats().await.unwrap().pending_total(), 0);
    }

    #[tokio::test]
    async fn test_generic_enqueue_with_metadata() {
        let (broker, client) = setup();
        let metadata = BTreeMap::from([("request_id".to_string(), "r-1".to_string())]);
        client
            .enqueue("report:render", b"{}".to_vec(), Priority::Low, metadata)
            .await
            .unwrap();

        let pending = broker.pending_tasks("low").unwrap();
        assert_eq!(pending[0].metadata["request_id"], "r-1");

        let empty = client
            .enqueue("", vec![], Priority::Default, BTreeMap::new())
            .await;
        assert!(matches!(
            empty,
            Err(ClientError::Validation(TaskError::EmptyTaskType))
        ));
    }

    #[tokio::test]
    async fn test_bulk_counts_partial_failures() {
        let (broker, client) = setup();
        let bulk = BulkNotification {
            kind: NotificationKind::Email,
            recipients: vec![
                "a@example.com".to_string(),
                "not-an-address".to_string(),
                "b@example.com".to_string(),
            ],
            subject: "Weekly digest".to_string(),
            message: "Here is what you missed".to_string(),
            priority: String::new(),
            user_id: "digest".to_string(),
            data: BTreeMap::new(),
        };

        let summary = client.enqueue_bulk(&bulk).await.unwrap();
        assert_eq!(
            summary,
            BulkSummary {
                total: 3,
                success: 2,
                errors: 1
            }
        );
        assert_eq!(broker.pending_tasks("default").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_without_subject_is_rejected_up_front() {
        let (broker, client) = setup();
        for (kind, recipient) in [
            (NotificationKind::Email, "a@example.com"),
            (NotificationKind::Push, "device-1"),
        ] {
            let bulk = BulkNotification {
                kind,
                recipients: vec![recipient.to_string(), recipient.to_string()],
                subject: String::new(),
                message: "Here is what you missed".to_string(),
                priority: String::new(),
                user_id: "digest".to_string(),
                data: BTreeMap::new(),
            };
            let result = client.enqueue_bulk(&bulk).await;
            assert!(
                matches!(result, Err(ClientError::Validation(_))),
                "{kind:?}: {result:?}"
            );
        }
        assert_eq!(broker.stats().await.unwrap().pending_total(), 0);
    }

    #[tokio::test]
    async fn test_bulk_webhook_uses_post() {
        let (broker, client) = setup();
        let bulk = BulkNotification {
            kind: NotificationKind::Webhook,
            recipients: vec!["https://hooks.example.com/x".to_string()],
            subject: String::new(),
            message: "ping".to_string(),
            priority: "low".to_string(),
            user_id: "ops".to_string(),
            data: BTreeMap::from([("X-Token".to_string(), "t".to_string())]),
        };
        client.enqueue_bulk(&bulk).await.unwrap();

        let pending = broker.pending_tasks("low").unwrap();
        assert_eq!(pending[0].max_retries, 5);
        let hook: WebhookNotification = serde_json::from_slice(&pending[0].payload).unwrap();
        assert_eq!(hook.method, "POST");
        assert_eq!(hook.headers["X-Token"], "t");
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown_begins() {
        let (broker, client) = setup();
        let (tx, rx) = watch::channel(true);
        let client = client.with_health(rx);

        client.enqueue_sms(&SmsNotification {
            to: "+15550100".to_string(),
            message: "code 1234".to_string(),
            priority: "high".to_string(),
            user_id: "u".to_string(),
        })
        .await
        .unwrap();

        tx.send_replace(false);
        let result = client
            .enqueue("sms:notification", b"{}".to_vec(), Priority::High, BTreeMap::new())
            .await;
        assert!(matches!(result, Err(ClientError::NotAccepting)));
        assert_eq!(broker.pending_tasks("critical").unwrap().len(), 1);
    }
}
