//! Recurring timers for reconciliation and heartbeat.
//!
//! Each timer spawns its task on every tick instead of awaiting it, so a slow
//! pass never delays the timer. Overlap is handled by the task itself: the
//! engine drops ticks while a pass is in flight.

use crate::engine::ReconciliationEngine;
use crate::heartbeat::HeartbeatReporter;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Shortest timer period accepted.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Work run on every tick of a timer.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    async fn run(&self);
}

#[async_trait]
impl PeriodicTask for ReconciliationEngine {
    async fn run(&self) {
        self.run_pass().await;
    }
}

#[async_trait]
impl PeriodicTask for HeartbeatReporter {
    async fn run(&self) {
        self.report().await;
    }
}

struct Timer {
    name: &'static str,
    period: Duration,
    task: Arc<dyn PeriodicTask>,
}

/// Owns the timers. They are started at most once per scheduler.
pub struct Scheduler {
    timers: Vec<Timer>,
    started: AtomicBool,
    cancel: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field(
                "timers",
                &self.timers.iter().map(|t| (t.name, t.period)).collect::<Vec<_>>(),
            )
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            timers: Vec::new(),
            started: AtomicBool::new(false),
            cancel,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a timer. Only effective before [`Scheduler::start_once`].
    /// A zero period is raised to [`MIN_PERIOD`].
    #[must_use]
    pub fn with_task(
        mut self,
        name: &'static str,
        period: Duration,
        task: Arc<dyn PeriodicTask>,
    ) -> Self {
        let period = period.max(MIN_PERIOD);
        self.timers.push(Timer { name, period, task });
        self
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Start every timer. Returns `false` if they were already started.
    pub async fn start_once(&self) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Timers already running");
            return false;
        }

        let mut handles = self.handles.lock().await;
        for timer in &self.timers {
            info!(
                timer = timer.name,
                period_ms = u64::try_from(timer.period.as_millis()).unwrap_or(u64::MAX),
                "Starting timer"
            );
            let task = Arc::clone(&timer.task);
            let period = timer.period;
            let name = timer.name;
            let mut cancel = self.cancel.subscribe();

            handles.push(tokio::spawn(async move {
                let mut ticks = interval(period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        changed = cancel.changed() => {
                            if changed.is_err() || *cancel.borrow() {
                                debug!(timer = name, "Timer stopped");
                                break;
                            }
                        }
                        _ = ticks.tick() => {
                            let task = Arc::clone(&task);
                            tokio::spawn(async move {
                                task.run().await;
                            });
                        }
                    }
                }
            }));
        }
        true
    }

    /// Stop the timers. Tasks already spawned by a tick run to completion.
    pub async fn stop(&self) {
        let _ = self.cancel.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
