//! Partitioned worker pool
//!
//! One task per broker partition. Messages of a partition are processed one at
//! a time; partitions run independently. Idle partitions are polled at a fixed
//! interval. All tasks stop at the next message boundary once the
//! cancellation token fires.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::Subscription;
use crate::worker::{Ack, IngestWorker};

#[derive(Clone)]
pub struct IngestPool {
    subscription: Arc<dyn Subscription>,
    worker: Arc<IngestWorker>,
    poll_interval: Duration,
}

impl IngestPool {
    pub fn new(subscription: Arc<dyn Subscription>, worker: Arc<IngestWorker>, poll_interval: Duration) -> Self {
        Self {
            subscription,
            worker,
            poll_interval,
        }
    }

    /// Receive and settle the next message of `partition`
    ///
    /// Returns the decision taken, or `None` if the partition was empty.
    pub async fn process_next(&self, partition: u32) -> atlas_common::Result<Option<Ack>> {
        let Some(delivery) = self.subscription.receive(partition).await? else {
            return Ok(None);
        };

        let ack = self.worker.on_message(&delivery.body).await;
        match ack {
            Ack::Ack => self.subscription.ack(&delivery).await?,
            Ack::Nack => self.subscription.nack(&delivery).await?,
        }
        Ok(Some(ack))
    }

    /// Start one task per partition
    pub fn spawn(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let partitions = self.subscription.partitions();
        info!(partitions, "Starting ingest workers");

        (0..partitions)
            .map(|partition| {
                let pool = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { pool.run_partition(partition, cancel).await })
            })
            .collect()
    }

    async fn run_partition(&self, partition: u32, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let idle = match self.process_next(partition).await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    warn!(partition, error = %e, "Broker unavailable");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        info!(partition, "Ingest worker stopped");
    }
}
