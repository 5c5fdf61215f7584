//! Liveness monitor
//!
//! Periodically forces the session idle when the sender has gone away. A
//! disconnect produces no event, so this is the only way to notice it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::events::ClientGauge;

use super::coordinator::Coordinator;

/// `tokio::time::interval` panics on a zero period
const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct LivenessMonitor {
    interval: Duration,
    clients: ClientGauge,
}

impl LivenessMonitor {
    pub fn new(interval: Duration, clients: ClientGauge) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            clients,
        }
    }

    /// Tick until `shutdown` flips or its sender is dropped
    pub async fn run(self, coordinator: Arc<Coordinator>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Some(transition) = coordinator.check_liveness(&self.clients).await {
                        tracing::info!(from = %transition.from, "No sender connected; session forced idle");
                    }
                }
            }
        }
        tracing::debug!("Liveness monitor stopped");
    }
}
