use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::store::JobStore;

/// Long-lived task promoting due entries of the `schedule` and `retry` sets
/// onto their ready queues.
///
/// One scheduler per manager; several processes polling the same namespace
/// are safe because each entry is claimed atomically. Redis errors are
/// logged and the loop keeps polling.
pub(crate) struct Scheduler {
    store: JobStore,
    interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub(crate) fn new(store: JobStore, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            store,
            interval,
            cancel,
        }
    }

    pub(crate) async fn run(self) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Starting scheduler");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.store.scheduler_dequeue(chrono::Utc::now()).await {
                        Ok(0) => {}
                        Ok(promoted) => tracing::debug!(promoted, "Promoted scheduled jobs"),
                        Err(e) => tracing::error!(error = %e, "Scheduler sweep failed"),
                    }
                }
            }
        }
    }
}
