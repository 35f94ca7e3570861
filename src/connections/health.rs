//! Background connection health monitor.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::ConnectionManager;

/// Handle to the running health loop. Dropping it does not stop the task;
/// call [`HealthMonitor::stop`].
#[derive(Debug)]
pub struct HealthMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Re-probe every registered connection each `interval`.
    ///
    /// The task holds only a weak reference and exits on its own once the
    /// manager is dropped.
    pub(crate) fn spawn(manager: Weak<ConnectionManager>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; connect() already probed.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        manager.check_health().await;
                    }
                }
            }
            tracing::debug!(name: "health.monitor.stopped", "health monitor stopped");
        });

        tracing::info!(
            name: "health.monitor.started",
            interval_secs = interval.as_secs(),
            "health monitor started"
        );
        Self { cancel, handle }
    }

    /// Cancel the loop and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(name: "health.monitor.join_failed", error = %e, "health monitor task failed");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
