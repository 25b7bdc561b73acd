//! Snapshot scheduler
//!
//! Periodically captures every active instrument's book through the
//! engine's own command queue, which serializes the capture with matching;
//! a snapshot can never observe mid-match state. Failures are logged and
//! the loop continues — snapshots are advisory.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::coordinator::ExchangeCoordinator;

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub interval: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

pub struct SnapshotScheduler {
    handle: JoinHandle<()>,
}

impl SnapshotScheduler {
    pub fn start(coordinator: Arc<ExchangeCoordinator>, config: SnapshotConfig) -> Self {
        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = config.interval.as_secs(), "snapshot scheduler started");
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick fires immediately; skip it so captures start
            // one full interval after boot
            ticker.tick().await;

            loop {
                ticker.tick().await;
                for instrument in coordinator.instruments() {
                    if let Err(e) = coordinator.request_snapshot(&instrument).await {
                        tracing::warn!(instrument = %instrument, "snapshot failed: {}", e);
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn shutdown(self) {
        self.handle.abort();
        tracing::info!("snapshot scheduler stopped");
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
