use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shortest pause between two refresh passes.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// One refresh pass over the remote catalogs. Implemented by the addon
/// service, which fetches and then re-merges.
pub trait RefreshTask: Send + Sync {
    fn refresh<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Background task that refreshes remote catalogs on a fixed interval.
///
/// The first pass runs immediately. The loop exits promptly once the token
/// is cancelled, including while a pass is in flight.
pub struct CatalogRefreshScheduler {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl CatalogRefreshScheduler {
    pub fn spawn(task: Arc<dyn RefreshTask>, interval: Duration, cancel: CancellationToken) -> Self {
        if interval < MIN_REFRESH_INTERVAL {
            tracing::warn!(
                requested_secs = interval.as_secs(),
                min_secs = MIN_REFRESH_INTERVAL.as_secs(),
                "Refresh interval too short; clamping"
            );
        }
        let interval = interval.max(MIN_REFRESH_INTERVAL);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Catalog refresh loop started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = task.refresh() => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::info!("Catalog refresh loop stopped");
        });
        Self { handle, cancel }
    }

    /// Cancel the loop and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Catalog refresh task ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
