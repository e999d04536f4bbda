use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::UsageGovernor;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic garbage collection of governor state.
pub struct GovernorSweeper;

impl GovernorSweeper {
    /// Spawns the sweep loop; the first sweep runs one `every` after start.
    /// Intervals shorter than one second are raised to one second.
    pub fn start(governor: Arc<UsageGovernor>, every: Duration) -> SweeperHandle {
        let every = every.max(MIN_SWEEP_INTERVAL);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let sweeps = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&sweeps);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                event_name = "core.governor.sweeper.started",
                interval_secs = every.as_secs(),
                "governor sweeper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = governor.sweep();
                        counter.fetch_add(1, Ordering::Relaxed);
                        if report.removed_callers > 0 || report.expired_bans > 0 {
                            debug!(
                                event_name = "core.governor.sweep",
                                removed_callers = report.removed_callers,
                                expired_bans = report.expired_bans,
                                evicted_timestamps = report.evicted_timestamps,
                                "governor sweep completed"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(event_name = "core.governor.sweeper.stopped", "governor sweeper stopped");
        });

        SweeperHandle { shutdown, task, sweeps }
    }
}

pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    sweeps: Arc<AtomicU64>,
}

impl SweeperHandle {
    pub fn sweeps_completed(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
