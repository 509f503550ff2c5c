//! Interval scheduling for processing cycles.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{ProcessorError, Result};

/// Source of wall-clock time for the scheduler.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Resolve once `now() >= deadline`.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(remaining).await;
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: watch::Sender<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (now, _) = watch::channel(start);
        Self { now }
    }

    /// Move time forward, waking sleepers whose deadline has passed.
    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        self.now.send_modify(|now| *now += step);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut rx = self.now.subscribe();
        let _ = rx.wait_for(|now| *now >= deadline).await;
    }
}

/// Observable state of a running schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleState {
    /// Start of the most recent cycle
    pub last_run: Option<DateTime<Utc>>,
    /// When the next cycle is due
    pub next_run: Option<DateTime<Utc>>,
    /// Cycles completed
    pub run_count: u64,
}

/// Longer intervals are clamped.
const MAX_INTERVAL_DAYS: i64 = 36_500;

fn saturating_add(at: DateTime<Utc>, step: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(step).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The first tick after `now` on the grid `previous + k * step`, and how
/// many ticks were passed over to reach it.
fn next_tick(previous: DateTime<Utc>, step: chrono::Duration, now: DateTime<Utc>) -> (DateTime<Utc>, i64) {
    let next = saturating_add(previous, step);
    if next > now {
        return (next, 0);
    }

    let step_ms = step.num_milliseconds().max(1);
    let skipped = (now - next).num_milliseconds() / step_ms + 1;
    let aligned = skipped
        .checked_mul(step_ms)
        .and_then(chrono::Duration::try_milliseconds)
        .and_then(|advance| next.checked_add_signed(advance));
    match aligned {
        Some(at) => (at, skipped),
        None => (saturating_add(now, step), skipped),
    }
}

/// Runs a cycle at a fixed interval.
///
/// A cycle is awaited to completion before the next one is scheduled, so
/// cycles never overlap. Ticks missed while a cycle was running are skipped
/// and the schedule stays aligned to its start.
pub struct CycleScheduler {
    interval: Duration,
    clock: Arc<dyn Clock>,
    run_immediately: bool,
}

impl CycleScheduler {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            clock,
            run_immediately: false,
        }
    }

    /// Run the first cycle on start instead of one interval later.
    pub fn with_immediate(mut self) -> Self {
        self.run_immediately = true;
        self
    }

    /// Spawn the schedule loop.
    pub fn start<F, Fut>(self, mut cycle: F) -> SchedulerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(ScheduleState::default()));
        let shared = state.clone();
        let Self {
            interval,
            clock,
            run_immediately,
        } = self;
        let step = chrono::Duration::from_std(interval)
            .unwrap_or_else(|_| chrono::Duration::days(MAX_INTERVAL_DAYS))
            .max(chrono::Duration::milliseconds(1));

        let task = tokio::spawn(async move {
            let mut next = if run_immediately {
                clock.now()
            } else {
                saturating_add(clock.now(), step)
            };
            shared.write().next_run = Some(next);
            info!(?interval, next_run = %next, "Scheduler started");

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = clock.sleep_until(next) => {}
                }

                let started = clock.now();
                cycle().await;

                let now = clock.now();
                let previous = next;
                let (following, skipped) = next_tick(previous, step, now);
                next = following;
                if skipped > 0 {
                    debug!(skipped, "Skipped missed ticks");
                }

                let run_count = {
                    let mut state = shared.write();
                    state.last_run = Some(started);
                    state.next_run = Some(next);
                    state.run_count += 1;
                    state.run_count
                };
                info!(
                    last_run = %started,
                    scheduled_for = %previous,
                    next_run = %next,
                    run_count,
                    "Cycle finished"
                );
            }

            shared.write().next_run = None;
            info!("Scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            state,
            task,
        }
    }
}

/// Control handle for a running [`CycleScheduler`].
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    state: Arc<RwLock<ScheduleState>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop scheduling. A cycle already running completes first.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn state(&self) -> ScheduleState {
        self.state.read().clone()
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| ProcessorError::internal(format!("scheduler task failed: {}", e)))
    }
}
