use crate::{Priority, Result, TaskError, MAX_PAYLOAD_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task, stable across retries
pub type TaskId = Uuid;

/// Task payload (opaque bytes, interpreted only by the handler)
pub type TaskPayload = Vec<u8>;

/// Task type identifier.
///
/// Open-ended: any non-empty string routes to the handler registered under
/// it. The four notification channels have well-known names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub const EMAIL: &'static str = "email:notification";
    pub const SMS: &'static str = "sms:notification";
    pub const PUSH: &'static str = "push:notification";
    pub const WEBHOOK: &'static str = "webhook:notification";

    pub fn new(value: impl Into<String>) -> Self {
        TaskType(value.into())
    }

    pub fn email() -> Self {
        TaskType::new(Self::EMAIL)
    }

    pub fn sms() -> Self {
        TaskType::new(Self::SMS)
    }

    pub fn push() -> Self {
        TaskType::new(Self::PUSH)
    }

    pub fn webhook() -> Self {
        TaskType::new(Self::WEBHOOK)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskType {
    fn from(value: &str) -> Self {
        TaskType::new(value)
    }
}

impl From<String> for TaskType {
    fn from(value: String) -> Self {
        TaskType(value)
    }
}

/// Retry budget and execution deadline for a task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
}

impl TaskPolicy {
    /// Policy for types outside the well-known notification set.
    pub const FALLBACK: TaskPolicy = TaskPolicy {
        max_retries: 3,
        timeout: Duration::from_secs(30),
    };

    /// Static per-type policy table.
    pub fn for_type(task_type: &TaskType) -> Self {
        let (max_retries, timeout_secs) = match task_type.as_str() {
            TaskType::EMAIL => (3, 30),
            TaskType::SMS => (3, 15),
            TaskType::PUSH => (3, 20),
            TaskType::WEBHOOK => (5, 60),
            _ => return Self::FALLBACK,
        };
        TaskPolicy {
            max_retries,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// Pending -> Active -> Succeeded
///                   -> RetryScheduled -> Pending
///                   -> FailedPermanent
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in its queue to be claimed
    Pending,
    /// Claimed by exactly one worker for the current attempt
    Active,
    /// Failed recoverably, waiting out its backoff delay
    RetryScheduled,
    /// Completed successfully
    Succeeded,
    /// Retry budget exhausted, skip-retry error or unroutable
    FailedPermanent,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::RetryScheduled => "retry_scheduled",
            TaskState::Succeeded => "succeeded",
            TaskState::FailedPermanent => "failed_permanent",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::FailedPermanent)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Active, Succeeded)
                | (Active, RetryScheduled)
                | (Active, FailedPermanent)
                | (RetryScheduled, Pending)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of notification work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Routing key for the handler registry
    pub task_type: TaskType,

    /// Serialized notification parameters (max 10MB)
    pub payload: TaskPayload,

    /// Priority the producer asked for
    pub priority: Priority,

    /// Lane the task lives on, resolved from `priority`
    pub queue: String,

    /// Number of executions allowed in total
    pub max_retries: u32,

    /// Per-execution deadline
    pub timeout: Duration,

    /// Number of claims so far (one-indexed once claimed)
    pub attempt: u32,

    /// Current state
    pub state: TaskState,

    /// Producer metadata (user id, request id, ...)
    pub metadata: BTreeMap<String, String>,

    /// Error from the most recent failed attempt
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task with queue and policy resolved from the tables
    pub fn new(
        task_type: impl Into<TaskType>,
        payload: TaskPayload,
        priority: Priority,
    ) -> Result<Self> {
        Task::builder(task_type, payload).priority(priority).build()
    }

    /// Create a task whose payload is the JSON encoding of `payload`
    pub fn from_json<T: Serialize>(
        task_type: impl Into<TaskType>,
        payload: &T,
        priority: Priority,
    ) -> Result<Self> {
        let bytes = serde_json::to_vec(payload)?;
        Task::new(task_type, bytes, priority)
    }

    pub fn builder(task_type: impl Into<TaskType>, payload: TaskPayload) -> TaskBuilder {
        TaskBuilder::new(task_type.into(), payload)
    }

    /// Serialize task to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(TaskError::from)
    }

    /// Deserialize task from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(TaskError::from)
    }

    /// Whether another attempt is allowed after the current one fails
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Take the claim for one execution attempt
    pub fn claim(&mut self) -> Result<()> {
        self.transition(TaskState::Active)?;
        self.attempt += 1;
        Ok(())
    }

    /// Mark task as completed successfully
    pub fn succeed(&mut self) -> Result<()> {
        self.transition(TaskState::Succeeded)
    }

    /// Park the task until its backoff delay elapses
    pub fn schedule_retry(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskState::RetryScheduled)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Mark task as permanently failed
    pub fn fail_permanent(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskState::FailedPermanent)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Return a retry-scheduled task to its queue
    pub fn requeue(&mut self) -> Result<()> {
        self.transition(TaskState::Pending)
    }

    /// Put an abandoned claim back to pending without consuming a state
    /// machine transition. Used when a lease expires without an outcome.
    pub fn release(&mut self) {
        if self.state == TaskState::Active {
            self.state = TaskState::Pending;
            self.updated_at = Utc::now();
        }
    }
}

/// Builder for tasks that need metadata or policy overrides
pub struct TaskBuilder {
    task_type: TaskType,
    payload: TaskPayload,
    priority: Priority,
    max_retries: Option<u32>,
    timeout: Option<Duration>,
    metadata: BTreeMap<String, String>,
}

impl TaskBuilder {
    pub fn new(task_type: TaskType, payload: TaskPayload) -> Self {
        TaskBuilder {
            task_type,
            payload,
            priority: Priority::default(),
            max_retries: None,
            timeout: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn extend_metadata<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn build(self) -> Result<Task> {
        if self.task_type.is_empty() {
            return Err(TaskError::EmptyTaskType);
        }
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TaskError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: self.payload.len(),
            });
        }

        let policy = TaskPolicy::for_type(&self.task_type);
        let now = Utc::now();
        Ok(Task {
            id: Uuid::new_v4(),
            queue: self.priority.queue_name().to_string(),
            task_type: self.task_type,
            payload: self.payload,
            priority: self.priority,
            max_retries: self.max_retries.unwrap_or(policy.max_retries),
            timeout: self.timeout.unwrap_or(policy.timeout),
            attempt: 0,
            state: TaskState::Pending,
            metadata: self.metadata,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }
}
