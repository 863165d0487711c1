use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ClientStateStore;

/// How often stale client records are purged.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Periodically expires stale records until `shutdown` fires.
pub fn spawn_sweeper(
    store: Arc<ClientStateStore>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately; nothing is stale yet.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Client state sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    let report = store.sweep(std::time::Instant::now()).await;
                    info!(
                        "🧹 Client state cleanup: rates {} -> {}, histories {} -> {}",
                        report.before.rate_records,
                        report.after.rate_records,
                        report.before.history_records,
                        report.after.history_records
                    );
                }
            }
        }
    })
}
