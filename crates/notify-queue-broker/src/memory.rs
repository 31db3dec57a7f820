use crate::broker::{Broker, BrokerError, BrokerStats, Result};
use crate::config::QueueSetConfig;
use async_trait::async_trait;
use notify_queue_core::{Task, TaskId, TaskState};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Extra time a claim may outlive the task's own timeout before it is
/// considered abandoned.
pub const DEFAULT_LEASE_GRACE: Duration = Duration::from_secs(30);

/// Stand-in deadline for delays too large to represent as an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

/// A serialized task record. The id is kept alongside the bytes so a record
/// that fails to decode can still be accounted for.
struct Record {
    id: TaskId,
    bytes: Vec<u8>,
}

/// A task waiting out its retry backoff.
///
/// Ordered so that `BinaryHeap` pops the earliest `ready_at` first; `seq`
/// keeps equal deadlines in scheduling order.
struct ScheduledTask {
    ready_at: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Claim {
    task: Task,
    lease_expires_at: Instant,
}

struct BrokerState {
    /// Serialized task records per queue, head first
    queues: HashMap<String, VecDeque<Record>>,
    active: HashMap<TaskId, Claim>,
    scheduled: BinaryHeap<ScheduledTask>,
    dead_letters: Vec<Task>,
    /// Ids that are pending, scheduled or active
    live: HashSet<TaskId>,
    succeeded: u64,
    next_seq: u64,
}

impl BrokerState {
    fn queue_mut(&mut self, name: &str) -> Result<&mut VecDeque<Record>> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }

    /// Append a task record at the tail of its queue
    fn push_record(&mut self, task: &Task) -> Result<()> {
        let record = Record {
            id: task.id,
            bytes: task.to_bytes()?,
        };
        self.queue_mut(&task.queue)?.push_back(record);
        Ok(())
    }

    /// Move retry-scheduled tasks whose delay has elapsed to the tail of
    /// their original queue.
    fn promote_due(&mut self, now: Instant) -> Result<usize> {
        let mut promoted = 0;
        while self
            .scheduled
            .peek()
            .is_some_and(|entry| entry.ready_at <= now)
        {
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            let mut task = entry.task;
            task.requeue()?;
            self.push_record(&task)?;
            promoted += 1;
        }
        Ok(promoted)
    }

    fn has_ready_work(&self, now: Instant) -> bool {
        self.queues.values().any(|q| !q.is_empty())
            || self
                .scheduled
                .peek()
                .is_some_and(|entry| entry.ready_at <= now)
    }
}

/// In-process broker.
///
/// Holds every queue as an ordered list of bincode-encoded task records
/// behind a single mutex, so each trait operation is atomic. Waiters are
/// woken through a `Notify` when work arrives.
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
    lease_grace: Duration,
}

impl InMemoryBroker {
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queues = queues
            .into_iter()
            .map(|name| (name.into(), VecDeque::new()))
            .collect();

        InMemoryBroker {
            state: Mutex::new(BrokerState {
                queues,
                active: HashMap::new(),
                scheduled: BinaryHeap::new(),
                dead_letters: Vec::new(),
                live: HashSet::new(),
                succeeded: 0,
                next_seq: 0,
            }),
            notify: Notify::new(),
            lease_grace: DEFAULT_LEASE_GRACE,
        }
    }

    /// Broker with one queue per configured lane
    pub fn from_config(config: &QueueSetConfig) -> Self {
        Self::new(config.queues.iter().map(|q| q.name.clone()))
    }

    pub fn with_lease_grace(mut self, lease_grace: Duration) -> Self {
        self.lease_grace = lease_grace;
        self
    }

    /// Decoded contents of a queue, head first
    pub fn pending_tasks(&self, queue: &str) -> Result<Vec<Task>> {
        let state = self.state.lock();
        let records = state
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        records
            .iter()
            .map(|record| Task::from_bytes(&record.bytes).map_err(BrokerError::from))
            .collect()
    }

    /// Snapshot of an active claim
    pub fn active_task(&self, task_id: &TaskId) -> Option<Task> {
        self.state
            .lock()
            .active
            .get(task_id)
            .map(|claim| claim.task.clone())
    }

    /// Tasks that failed permanently, oldest first
    pub fn dead_letters(&self) -> Vec<Task> {
        self.state.lock().dead_letters.clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn enqueue(&self, task: &Task) -> Result<()> {
        if task.state != TaskState::Pending {
            return Err(BrokerError::NotPending(task.id));
        }

        {
            let mut state = self.state.lock();
            if state.live.contains(&task.id) {
                return Err(BrokerError::TaskAlreadyExists(task.id));
            }
            state.push_record(task)?;
            state.live.insert(task.id);
        }

        debug!(task_id = %task.id, queue = %task.queue, "Enqueued task");
        self.notify.notify_one();
        Ok(())
    }

    async fn claim(&self, queue: &str) -> Result<Option<Task>> {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.promote_due(now)?;

        let Some(record) = state.queue_mut(queue)?.pop_front() else {
            return Ok(None);
        };

        let claimed = Task::from_bytes(&record.bytes).and_then(|mut task| {
            task.claim()?;
            Ok(task)
        });
        let task = match claimed {
            Ok(task) => task,
            Err(e) => {
                warn!(queue, task_id = %record.id, "Dropping unusable task record: {}", e);
                state.live.remove(&record.id);
                return Err(e.into());
            }
        };

        let lease_expires_at = deadline_after(now, task.timeout.saturating_add(self.lease_grace));
        state.active.insert(
            task.id,
            Claim {
                task: task.clone(),
                lease_expires_at,
            },
        );

        Ok(Some(task))
    }

    async fn ack(&self, task_id: &TaskId) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(mut claim) = state.active.remove(task_id) else {
            debug!(task_id = %task_id, "Ack for task without an active claim");
            return Ok(false);
        };

        claim.task.succeed()?;
        state.live.remove(task_id);
        state.succeeded += 1;
        Ok(true)
    }

    async fn requeue(&self, task_id: &TaskId, delay: Duration, error: &str) -> Result<bool> {
        {
            let mut state = self.state.lock();
            let Some(mut claim) = state.active.remove(task_id) else {
                debug!(task_id = %task_id, "Requeue for task without an active claim");
                return Ok(false);
            };

            claim.task.schedule_retry(error)?;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.scheduled.push(ScheduledTask {
                ready_at: deadline_after(Instant::now(), delay),
                seq,
                task: claim.task,
            });
        }

        // Wake a waiter so it can re-arm its timer on the new deadline
        self.notify.notify_one();
        Ok(true)
    }

    async fn dead_letter(&self, task_id: &TaskId, error: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(mut claim) = state.active.remove(task_id) else {
            debug!(task_id = %task_id, "Dead-letter for task without an active claim");
            return Ok(false);
        };

        claim.task.fail_permanent(error)?;
        state.live.remove(task_id);
        state.dead_letters.push(claim.task);
        Ok(true)
    }

    async fn recover_expired(&self) -> Result<usize> {
        let recovered = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let expired: Vec<TaskId> = state
                .active
                .iter()
                .filter(|(_, claim)| claim.lease_expires_at <= now)
                .map(|(id, _)| *id)
                .collect();

            for task_id in &expired {
                if let Some(claim) = state.active.remove(task_id) {
                    let mut task = claim.task;
                    task.release();
                    state.push_record(&task)?;
                }
            }
            expired.len()
        };

        if recovered > 0 {
            info!("Recovered {} tasks with expired leases", recovered);
            self.notify.notify_one();
        }
        Ok(recovered)
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let notified = self.notify.notified();
        let deadline = {
            let state = self.state.lock();
            let now = Instant::now();
            if state.has_ready_work(now) {
                return;
            }
            let fallback = deadline_after(now, max_wait);
            state
                .scheduled
                .peek()
                .map(|entry| entry.ready_at.min(fallback))
                .unwrap_or(fallback)
        };

        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }

    async fn stats(&self) -> Result<BrokerStats> {
        let state = self.state.lock();
        Ok(BrokerStats {
            pending: state
                .queues
                .iter()
                .map(|(name, records)| (name.clone(), records.len()))
                .collect(),
            scheduled: state.scheduled.len(),
            active: state.active.len(),
            succeeded: state.succeeded,
            dead: state.dead_letters.len(),
        })
    }
}
