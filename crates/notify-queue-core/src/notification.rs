//! Typed notification payloads.
//!
//! These are the JSON documents stored in a task's payload for each of the
//! four notification channels. Field names follow the wire format producers
//! already send (camelCase).

use crate::{Priority, Result, TaskError, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Common surface of the four payload types
pub trait Notification: Serialize {
    fn task_type() -> TaskType;

    fn priority(&self) -> Priority;

    fn user_id(&self) -> &str;

    fn validate(&self) -> Result<()>;
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TaskError::InvalidNotification(format!("{field} is required")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailNotification {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: String,
    pub user_id: String,
}

impl Notification for EmailNotification {
    fn task_type() -> TaskType {
        TaskType::email()
    }

    fn priority(&self) -> Priority {
        Priority::parse(&self.priority)
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn validate(&self) -> Result<()> {
        require("to", &self.to)?;
        if !self.to.contains('@') {
            return Err(TaskError::InvalidNotification(format!(
                "to is not an email address: {}",
                self.to
            )));
        }
        require("subject", &self.subject)?;
        require("body", &self.body)?;
        require("userId", &self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsNotification {
    pub to: String,
    pub message: String,
    #[serde(default)]
    pub priority: String,
    pub user_id: String,
}

impl Notification for SmsNotification {
    fn task_type() -> TaskType {
        TaskType::sms()
    }

    fn priority(&self) -> Priority {
        Priority::parse(&self.priority)
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn validate(&self) -> Result<()> {
        require("to", &self.to)?;
        require("message", &self.message)?;
        require("userId", &self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub device_token: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: String,
    pub user_id: String,
}

impl Notification for PushNotification {
    fn task_type() -> TaskType {
        TaskType::push()
    }

    fn priority(&self) -> Priority {
        Priority::parse(&self.priority)
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn validate(&self) -> Result<()> {
        require("deviceToken", &self.device_token)?;
        require("title", &self.title)?;
        require("body", &self.body)?;
        require("userId", &self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookNotification {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
    #[serde(default)]
    pub priority: String,
    pub user_id: String,
}

fn default_method() -> String {
    "POST".to_string()
}

impl WebhookNotification {
    /// Fill in the method when the producer left it blank
    pub fn normalized(mut self) -> Self {
        if self.method.trim().is_empty() {
            self.method = default_method();
        }
        self
    }
}

impl Notification for WebhookNotification {
    fn task_type() -> TaskType {
        TaskType::webhook()
    }

    fn priority(&self) -> Priority {
        Priority::parse(&self.priority)
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn validate(&self) -> Result<()> {
        require("url", &self.url)?;
        require("userId", &self.user_id)?;
        if self.body.is_null() {
            return Err(TaskError::InvalidNotification("body is required".to_string()));
        }
        Ok(())
    }
}

/// Channel of a bulk request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Email,
    Sms,
    Push,
    Webhook,
}

impl NotificationKind {
    pub fn task_type(&self) -> TaskType {
        match self {
            NotificationKind::Email => TaskType::email(),
            NotificationKind::Sms => TaskType::sms(),
            NotificationKind::Push => TaskType::push(),
            NotificationKind::Webhook => TaskType::webhook(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Email => "email",
            NotificationKind::Sms => "sms",
            NotificationKind::Push => "push",
            NotificationKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message fanned out to many recipients of the same channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkNotification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub priority: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

/// A single recipient's share of a bulk request
#[derive(Debug, Clone, PartialEq)]
pub enum BulkItem {
    Email(EmailNotification),
    Sms(SmsNotification),
    Push(PushNotification),
    Webhook(WebhookNotification),
}

impl BulkNotification {
    pub fn validate(&self) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(TaskError::InvalidNotification(
                "recipients must not be empty".to_string(),
            ));
        }
        require("message", &self.message)?;
        require("userId", &self.user_id)?;
        match self.kind {
            // Becomes the email subject or push title of every item
            NotificationKind::Email | NotificationKind::Push => require("subject", &self.subject),
            NotificationKind::Sms | NotificationKind::Webhook => Ok(()),
        }
    }

    /// Expand into one payload per recipient.
    ///
    /// Push recipients are device tokens and take the subject as title;
    /// webhook recipients are URLs and take `data` as request headers.
    pub fn items(&self) -> Vec<BulkItem> {
        self.recipients
            .iter()
            .map(|recipient| self.item_for(recipient))
            .collect()
    }

    fn item_for(&self, recipient: &str) -> BulkItem {
        let recipient = recipient.to_string();
        match self.kind {
            NotificationKind::Email => BulkItem::Email(EmailNotification {
                to: recipient,
                subject: self.subject.clone(),
                body: self.message.clone(),
                template_id: None,
                data: self.data.clone(),
                priority: self.priority.clone(),
                user_id: self.user_id.clone(),
            }),
            NotificationKind::Sms => BulkItem::Sms(SmsNotification {
                to: recipient,
                message: self.message.clone(),
                priority: self.priority.clone(),
                user_id: self.user_id.clone(),
            }),
            NotificationKind::Push => BulkItem::Push(PushNotification {
                device_token: recipient,
                title: self.subject.clone(),
                body: self.message.clone(),
                data: self.data.clone(),
                priority: self.priority.clone(),
                user_id: self.user_id.clone(),
            }),
            NotificationKind::Webhook => BulkItem::Webhook(WebhookNotification {
                url: recipient,
                method: default_method(),
                headers: self.data.clone(),
                body: serde_json::Value::String(self.message.clone()),
                priority: self.priority.clone(),
                user_id: self.user_id.clone(),
            }),
        }
    }
}
