use crate::pool::WorkerPool;
use parking_lot::Mutex;
use notify_queue_core::TaskId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long a forced stop waits for cancelled executions to unwind and for
/// outstanding outcome reports before giving up on them
pub const FORCE_STOP_BOUND: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReport {
    /// Every in-flight execution finished within the grace period
    Drained { elapsed: Duration },
    /// The grace period ran out and the remaining executions were cancelled,
    /// or their outcome reports did not complete within [`FORCE_STOP_BOUND`].
    /// Their claims were never acked, so the broker redelivers them.
    ForcedCancel { abandoned: usize },
    /// The worker was not running; nothing was done
    NotRunning,
}

/// Read side of the "accepting work" signal
#[derive(Debug, Clone)]
pub struct HealthHandle {
    rx: watch::Receiver<bool>,
}

impl HealthHandle {
    pub fn is_accepting(&self) -> bool {
        *self.rx.borrow()
    }

    /// Raw receiver, for producers that only need the boolean
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Resolve once shutdown has begun
    pub async fn shutdown_started(&mut self) {
        // An Err means the coordinator is gone, which is as stopped as it gets
        let _ = self.rx.wait_for(|accepting| !accepting).await;
    }
}

struct Running {
    pool: Arc<WorkerPool>,
    dispatcher: JoinHandle<()>,
}

struct Inner {
    state: LifecycleState,
    running: Option<Running>,
}

/// Owns the worker lifecycle.
///
/// `request_shutdown` stops the dispatcher from claiming and flips the
/// health signal; `stop` additionally waits for in-flight executions up to
/// the grace period and cancels whatever is left.
pub struct ShutdownCoordinator {
    inner: Mutex<Inner>,
    accepting: watch::Sender<bool>,
    stop_token: CancellationToken,
    grace_period: Duration,
    stop_lock: tokio::sync::Mutex<()>,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        let (accepting, _) = watch::channel(true);
        ShutdownCoordinator {
            inner: Mutex::new(Inner {
                state: LifecycleState::Idle,
                running: None,
            }),
            accepting,
            stop_token: CancellationToken::new(),
            grace_period,
            stop_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn is_accepting(&self) -> bool {
        *self.accepting.borrow()
    }

    pub fn health(&self) -> HealthHandle {
        HealthHandle {
            rx: self.accepting.subscribe(),
        }
    }

    /// Fires when claiming must stop
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    /// Move from `Idle` to `Running`, spawning the dispatcher with the stop
    /// token. Returns false (and spawns nothing) in any other state.
    pub fn launch<F>(&self, pool: Arc<WorkerPool>, spawn_dispatcher: F) -> bool
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let mut inner = self.inner.lock();
        if inner.state != LifecycleState::Idle {
            return false;
        }

        let dispatcher = spawn_dispatcher(self.stop_token.clone());
        inner.running = Some(Running { pool, dispatcher });
        inner.state = LifecycleState::Running;
        true
    }

    /// Stop claiming new tasks. In-flight executions keep running.
    pub fn request_shutdown(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            LifecycleState::Running => {
                info!("Shutdown requested, no longer claiming tasks");
                inner.state = LifecycleState::Draining;
            }
            LifecycleState::Idle => inner.state = LifecycleState::Stopped,
            LifecycleState::Draining | LifecycleState::Stopped => return,
        }
        self.accepting.send_replace(false);
        self.stop_token.cancel();
    }

    /// Drain and stop. Safe to call any number of times; only the first
    /// call on a running worker does anything.
    pub async fn stop(&self) -> StopReport {
        let _serial = self.stop_lock.lock().await;

        let running = self.inner.lock().running.take();
        let Some(Running {
            pool,
            mut dispatcher,
        }) = running
        else {
            info!(state = %self.state(), "Stop requested but worker is not running");
            return StopReport::NotRunning;
        };

        self.request_shutdown();
        let started = Instant::now();
        let deadline = started + self.grace_period;
        info!(
            in_flight = pool.active_count(),
            "Waiting up to {:?} for in-flight tasks",
            self.grace_period
        );

        let drained = tokio::time::timeout_at(deadline, async {
            // The dispatcher hands off any task it already claimed before exiting
            let _ = (&mut dispatcher).await;
            pool.drain().await;
        })
        .await
        .is_ok();

        let report = if drained {
            let elapsed = started.elapsed();
            info!("All tasks completed in {:?}", elapsed);
            StopReport::Drained { elapsed }
        } else {
            dispatcher.abort();
            let mut abandoned: HashSet<TaskId> = pool.cancel_all().into_iter().collect();
            warn!(
                cancelled = abandoned.len(),
                "Grace period of {:?} exceeded, cancelling remaining tasks", self.grace_period
            );
            if tokio::time::timeout(FORCE_STOP_BOUND, pool.drain()).await.is_err() {
                let unreported = pool.unreported();
                warn!(
                    unreported = unreported.len(),
                    "Outcome reports still pending after {:?}, leaving them to lease recovery",
                    FORCE_STOP_BOUND
                );
                abandoned.extend(unreported);
            }
            StopReport::ForcedCancel {
                abandoned: abandoned.len(),
            }
        };

        self.inner.lock().state = LifecycleState::Stopped;
        report
    }
}
