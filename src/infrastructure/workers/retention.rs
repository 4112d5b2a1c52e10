use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::domain::ports::job_store::JobStore;
use crate::domain::ports::time_service::TimeService;

/// Periodically deletes completed and cancelled jobs older than `retention`.
/// Stops when `shutdown` fires.
pub fn spawn_retention_task(
    store: Arc<dyn JobStore>,
    time_service: Arc<dyn TimeService>,
    retention: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = time_service.now();
            let cutoff = chrono::Duration::from_std(retention)
                .ok()
                .and_then(|r| now.checked_sub_signed(r))
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

            match store.purge_finished(cutoff).await {
                Ok(0) => {}
                Ok(count) => info!("Purged {} finished jobs", count),
                Err(e) => error!("Failed to purge finished jobs: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = time_service.sleep(interval) => {}
            }
        }
        info!("Retention task stopped");
    })
}
