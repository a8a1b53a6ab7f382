//! Periodic background sync.
//!
//! The scheduler ticks once immediately and then on a fixed interval. Each
//! tick pushes pending records if there are any; failures are logged and the
//! next tick simply tries again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::records::WasteStore;

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was pending.
    Idle,
    /// The given number of records were synced.
    Synced(usize),
    /// The push failed; records stay pending.
    Failed,
}

/// Run one scheduler tick against `store`.
pub async fn run_tick(store: &WasteStore) -> TickOutcome {
    let pending = store.unsynced_count();
    if pending == 0 {
        debug!("Background sync: nothing pending");
        return TickOutcome::Idle;
    }

    debug!(pending, "Background sync starting");
    match store.sync_pending().await {
        Ok(count) => {
            info!(count, "Background sync uploaded records");
            TickOutcome::Synced(count)
        }
        Err(e) => {
            warn!(error = %e, "Background sync failed, will retry next tick");
            TickOutcome::Failed
        }
    }
}

/// Cloneable handle that stops a running scheduler from any task.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    stop_signal: Arc<AtomicBool>,
    wake: Arc<Notify>,
    ticks: Arc<AtomicU64>,
}

impl SchedulerHandle {
    fn new() -> Self {
        Self {
            stop_signal: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Signal the scheduler to stop. An in-flight sync runs to completion.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Ticks completed so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

/// Background task that calls [`run_tick`] on an interval.
#[derive(Debug)]
pub struct SyncScheduler {
    handle: SchedulerHandle,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    /// Start ticking on the current tokio runtime.
    ///
    /// The first tick fires immediately.
    #[must_use]
    pub fn spawn(store: Arc<WasteStore>, every: Duration) -> Self {
        let handle = SchedulerHandle::new();
        let task = tokio::spawn(run_loop(store, every, handle.clone()));
        Self { handle, task }
    }

    /// A handle for stopping the scheduler from elsewhere.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop the scheduler and wait for its task to finish.
    pub async fn shutdown(self) {
        self.handle.stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sync scheduler task ended abnormally");
        }
    }
}

async fn run_loop(store: Arc<WasteStore>, every: Duration, handle: SchedulerHandle) {
    info!(interval_secs = every.as_secs(), "Starting sync scheduler");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !handle.should_stop() {
        tokio::select! {
            _ = ticker.tick() => {}
            () = handle.wake.notified() => continue,
        }

        run_tick(&store).await;
        handle.ticks.fetch_add(1, Ordering::SeqCst);
    }

    debug!("Sync scheduler stopped");
}
