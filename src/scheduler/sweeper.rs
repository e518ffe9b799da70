use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::scheduler::manager::LeaseHandle;

/// Periodically asks the lease manager to reclaim expired leases.
pub struct HealthSweeper {
    interval: Duration,
}

impl HealthSweeper {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Send a sweep every interval until `shutdown` fires or the lease manager
    /// goes away. The first sweep happens one full interval after start.
    pub async fn run(&self, leases: LeaseHandle, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if leases.sweep().is_err() {
                        // Lease manager stopped
                        break;
                    }
                }
            }
        }
        tracing::debug!("Health sweeper stopped");
    }
}
