//! Index refresh queue
//!
//! Conditional writes record the ids whose equivalence set may have changed
//! in the durable [`RefreshQueue`], inside the write's own transaction. A
//! single background task drains that queue and calls
//! [`EquivalenceIndex::refresh`] for each id, retrying failures with capped
//! exponential backoff until the refresh succeeds. Requests left behind by a
//! stopped or crashed process are picked up on the next start.
//!
//! Writers wake the task through a [`RefreshHandle`] after an applied write;
//! the task also polls on an interval so requests written by other
//! processes are not left waiting.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use atlas_common::store::{EquivalenceIndex, RefreshQueue};

/// Refresh task timings
#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Idle re-check of the queue when no wake-up arrives
    pub poll_interval: Duration,
    /// Requests read per pass
    pub batch_size: usize,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }
}

/// Wakes the refresher after requests were recorded
#[derive(Clone)]
pub struct RefreshHandle {
    wake: Arc<Notify>,
}

impl RefreshHandle {
    /// Never fails: the request itself is already durable, a stopped
    /// refresher picks it up when it next runs.
    pub fn notify(&self) {
        self.wake.notify_one();
    }
}

/// Outcome of one pass over the queue
struct Pass {
    taken: usize,
    failed: usize,
}

/// Background task calling `refresh` for recorded requests
pub struct IndexRefresher {
    index: Arc<dyn EquivalenceIndex>,
    queue: Arc<dyn RefreshQueue>,
    settings: RefreshSettings,
    wake: Arc<Notify>,
}

impl IndexRefresher {
    /// Start the refresher; the task ends when `cancel` fires
    pub fn spawn(
        index: Arc<dyn EquivalenceIndex>,
        queue: Arc<dyn RefreshQueue>,
        settings: RefreshSettings,
        cancel: CancellationToken,
    ) -> (RefreshHandle, JoinHandle<()>) {
        let wake = Arc::new(Notify::new());
        let refresher = Self {
            index,
            queue,
            settings,
            wake: wake.clone(),
        };
        let task = tokio::spawn(refresher.run(cancel));
        (RefreshHandle { wake }, task)
    }

    async fn run(self, cancel: CancellationToken) {
        info!("Index refresher started");
        let mut backoff = self.settings.initial_backoff;

        while !cancel.is_cancelled() {
            let pause = match self.pass(&cancel).await {
                Ok(Pass { taken: 0, .. }) => {
                    backoff = self.settings.initial_backoff;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                    continue;
                }
                Ok(Pass { failed: 0, .. }) => {
                    backoff = self.settings.initial_backoff;
                    continue;
                }
                Ok(Pass { failed, .. }) => {
                    warn!(
                        failed,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Equivalence refreshes failed, will retry"
                    );
                    backoff
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Refresh queue unavailable"
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
            backoff = (backoff * 2).min(self.settings.max_backoff);
        }

        info!("Index refresher stopped");
    }

    /// Refresh one batch of requests; failed requests stay queued
    async fn pass(&self, cancel: &CancellationToken) -> atlas_common::Result<Pass> {
        let batch = self.queue.pending(self.settings.batch_size).await?;
        let mut failed = 0;

        for request in &batch {
            if cancel.is_cancelled() {
                break;
            }
            match self.index.refresh(request.id).await {
                Ok(()) => {
                    if !self.queue.complete(request).await? {
                        debug!(content_id = %request.id, "Refresh requested again while running");
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!(content_id = %request.id, error = %e, "Equivalence refresh failed");
                }
            }
        }

        if !batch.is_empty() {
            debug!(taken = batch.len(), failed, "Refresh pass finished");
        }
        Ok(Pass {
            taken: batch.len(),
            failed,
        })
    }
}
