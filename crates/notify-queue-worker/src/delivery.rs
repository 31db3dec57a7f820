//! Handlers for the four notification task types.
//!
//! Decoding and validation happen here; the actual sending is delegated to
//! an injected [`Notifier`].

use crate::handler::{HandlerError, HandlerRegistry, RegistryError, TaskContext, TaskHandler};
use async_trait::async_trait;
use notify_queue_core::notification::{
    EmailNotification, Notification, PushNotification, SmsNotification, WebhookNotification,
};
use notify_queue_core::Task;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Delivery capability for each notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, email: &EmailNotification) -> Result<(), HandlerError>;

    async fn send_sms(&self, sms: &SmsNotification) -> Result<(), HandlerError>;

    async fn send_push(&self, push: &PushNotification) -> Result<(), HandlerError>;

    async fn send_webhook(&self, webhook: &WebhookNotification) -> Result<(), HandlerError>;
}

/// A payload type that knows which notifier method delivers it
#[async_trait]
pub trait Deliver: Notification + DeserializeOwned + Send + Sync + 'static {
    async fn deliver(&self, notifier: &dyn Notifier) -> Result<(), HandlerError>;
}

#[async_trait]
impl Deliver for EmailNotification {
    async fn deliver(&self, notifier: &dyn Notifier) -> Result<(), HandlerError> {
        notifier.send_email(self).await
    }
}

#[async_trait]
impl Deliver for SmsNotification {
    async fn deliver(&self, notifier: &dyn Notifier) -> Result<(), HandlerError> {
        notifier.send_sms(self).await
    }
}

#[async_trait]
impl Deliver for PushNotification {
    async fn deliver(&self, notifier: &dyn Notifier) -> Result<(), HandlerError> {
        notifier.send_push(self).await
    }
}

#[async_trait]
impl Deliver for WebhookNotification {
    async fn deliver(&self, notifier: &dyn Notifier) -> Result<(), HandlerError> {
        notifier.send_webhook(&self.clone().normalized()).await
    }
}

/// Decodes a task payload as `P` and hands it to the notifier.
///
/// A payload that does not decode or validate can never succeed, so it is
/// rejected with `SkipRetry`.
pub struct NotificationHandler<P> {
    notifier: Arc<dyn Notifier>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Deliver> NotificationHandler<P> {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        NotificationHandler {
            notifier,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P: Deliver> TaskHandler for NotificationHandler<P> {
    async fn handle(&self, ctx: &TaskContext, task: &Task) -> Result<(), HandlerError> {
        let payload: P = serde_json::from_slice(&task.payload).map_err(|e| {
            HandlerError::skip_retry(format!("json decode of {} failed: {}", P::task_type(), e))
        })?;
        payload.validate().map_err(HandlerError::skip_retry)?;

        info!(
            task_id = %ctx.task_id,
            task_type = %P::task_type(),
            attempt = ctx.attempt,
            user_id = payload.user_id(),
            "Delivering notification"
        );

        tokio::select! {
            _ = ctx.cancelled() => Err(HandlerError::retryable("delivery cancelled by shutdown")),
            result = payload.deliver(self.notifier.as_ref()) => result,
        }
    }
}

/// Register handlers for email, SMS, push and webhook tasks
pub fn register_notification_handlers(
    registry: &mut HandlerRegistry,
    notifier: Arc<dyn Notifier>,
) -> Result<(), RegistryError> {
    registry.register(
        EmailNotification::task_type(),
        NotificationHandler::<EmailNotification>::new(notifier.clone()),
    )?;
    registry.register(
        SmsNotification::task_type(),
        NotificationHandler::<SmsNotification>::new(notifier.clone()),
    )?;
    registry.register(
        PushNotification::task_type(),
        NotificationHandler::<PushNotification>::new(notifier.clone()),
    )?;
    registry.register(
        WebhookNotification::task_type(),
        NotificationHandler::<WebhookNotification>::new(notifier),
    )
}

/// Notifier that only logs what it would send
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    /// Simulated send latency per channel
    latency: Option<ChannelLatency>,
}

#[derive(Debug, Clone)]
struct ChannelLatency {
    email: Duration,
    sms: Duration,
    push: Duration,
    webhook: Duration,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for a realistic provider round-trip before each send
    pub fn with_simulated_latency() -> Self {
        LogNotifier {
            latency: Some(ChannelLatency {
                email: Duration::from_secs(2),
                sms: Duration::from_secs(1),
                push: Duration::from_secs(1),
                webhook: Duration::from_secs(3),
            }),
        }
    }

    async fn pause(&self, pick: fn(&ChannelLatency) -> Duration) {
        if let Some(latency) = &self.latency {
            tokio::time::sleep(pick(latency)).await;
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, email: &EmailNotification) -> Result<(), HandlerError> {
        self.pause(|l| l.email).await;
        info!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }

    async fn send_sms(&self, sms: &SmsNotification) -> Result<(), HandlerError> {
        self.pause(|l| l.sms).await;
        info!(to = %sms.to, "SMS sent");
        Ok(())
    }

    async fn send_push(&self, push: &PushNotification) -> Result<(), HandlerError> {
        self.pause(|l| l.push).await;
        info!(device_token = %push.device_token, title = %push.title, "Push notification sent");
        Ok(())
    }

    async fn send_webhook(&self, webhook: &WebhookNotification) -> Result<(), HandlerError> {
        self.pause(|l| l.webhook).await;
        info!(url = %webhook.url, method = %webhook.method, "Webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_queue_core::{Priority, TaskType};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_email(&self, email: &EmailNotification) -> Result<(), HandlerError> {
            self.sent.lock().push(format!("email:{}", email.to));
            Ok(())
        }

        async fn send_sms(&self, sms: &SmsNotification) -> Result<(), HandlerError> {
            self.sent.lock().push(format!("sms:{}", sms.to));
            Ok(())
        }

        async fn send_push(&self, push: &PushNotification) -> Result<(), HandlerError> {
            self.sent.lock().push(format!("push:{}", push.device_token));
            Ok(())
        }

        async fn send_webhook(&self, webhook: &WebhookNotification) -> Result<(), HandlerError> {
            self.sent
                .lock()
                .push(format!("webhook:{} {}", webhook.method, webhook.url));
            Ok(())
        }
    }

    fn claimed(task_type: TaskType, payload: Vec<u8>) -> (TaskContext, Task) {
        let mut task = Task::new(task_type, payload, Priority::Default).unwrap();
        task.claim().unwrap();
        (TaskContext::new(&task, CancellationToken::new()), task)
    }

    fn registry_with(notifier: Arc<RecordingNotifier>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        register_notification_handlers(&mut registry, notifier).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_registers_all_four_types() {
        let registry = registry_with(Arc::new(RecordingNotifier::default()));
        assert_eq!(
            registry.task_types(),
            vec![
                TaskType::email(),
                TaskType::push(),
                TaskType::sms(),
                TaskType::webhook()
            ]
        );
    }

    #[tokio::test]
    async fn test_email_is_delivered() {
        let notifier = Arc::new(RecordingNotifier::default());
        let registry = registry_with(notifier.clone());

        let email = EmailNotification {
            to: "ada@example.com".to_string(),
            subject: "Welcome".to_string(),
            body: "Hi".to_string(),
            template_id: None,
            data: BTreeMap::new(),
            priority: "high".to_string(),
            user_id: "u-1".to_string(),
        };
        let (ctx, task) = claimed(TaskType::email(), serde_json::to_vec(&email).unwrap());

        let handler = registry.get(&TaskType::email()).unwrap();
        handler.handle(&ctx, &task).await.unwrap();
        assert_eq!(*notifier.sent.lock(), vec!["email:ada@example.com"]);
    }

    #[tokio::test]
    async fn test_webhook_method_is_normalized() {
        let notifier = Arc::new(RecordingNotifier::default());
        let registry = registry_with(notifier.clone());

        let payload = br#"{"url":"https://hooks.example.com/a","method":"","body":{"ok":true},"userId":"u"}"#;
        let (ctx, task) = claimed(TaskType::webhook(), payload.to_vec());

        let handler = registry.get(&TaskType::webhook()).unwrap();
        handler.handle(&ctx, &task).await.unwrap();
        assert_eq!(
            *notifier.sent.lock(),
            vec!["webhook:POST https://hooks.example.com/a"]
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_skips_retry() {
        let notifier = Arc::new(RecordingNotifier::default());
        let registry = registry_with(notifier.clone());

        let (ctx, task) = claimed(TaskType::sms(), b"not json".to_vec());
        let handler = registry.get(&TaskType::sms()).unwrap();
        let err = handler.handle(&ctx, &task).await.unwrap_err();

        assert!(matches!(err, HandlerError::SkipRetry(msg) if msg.contains("sms:notification")));
        assert!(notifier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_payload_skips_retry() {
        let registry = registry_with(Arc::new(RecordingNotifier::default()));
        let payload = br#"{"to":"","message":"hi","userId":"u"}"#;
        let (ctx, task) = claimed(TaskType::sms(), payload.to_vec());

        let handler = registry.get(&TaskType::sms()).unwrap();
        assert!(matches!(
            handler.handle(&ctx, &task).await,
            Err(HandlerError::SkipRetry(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_notifier_simulates_latency() {
        let notifier = LogNotifier::with_simulated_latency();
        let push = PushNotification {
            device_token: "tok".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            data: BTreeMap::new(),
            priority: String::new(),
            user_id: "u".to_string(),
        };

        let started = tokio::time::Instant::now();
        notifier.send_push(&push).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
