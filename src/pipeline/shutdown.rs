//! Ordered pipeline shutdown
//!
//! Queues are drained in topological order: intake stops first, then the
//! classification queue drains, and only then do the notification and
//! persistence queues get their stop markers. Copies fanned out while
//! classification drains therefore land ahead of the downstream markers.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{PipelineStats, PostingQueue, StatsSnapshot};
use crate::transport::Transport;

/// Owns the running pipeline and stops it in order
pub struct ShutdownCoordinator {
    intake_stop: watch::Sender<bool>,
    intake: JoinHandle<()>,
    classification: Arc<PostingQueue>,
    notification: Arc<PostingQueue>,
    persistence: Arc<PostingQueue>,
    workers: Vec<JoinHandle<()>>,
    transport: Arc<dyn Transport>,
    stats: Arc<PipelineStats>,
}

impl ShutdownCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        intake_stop: watch::Sender<bool>,
        intake: JoinHandle<()>,
        classification: Arc<PostingQueue>,
        notification: Arc<PostingQueue>,
        persistence: Arc<PostingQueue>,
        workers: Vec<JoinHandle<()>>,
        transport: Arc<dyn Transport>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            intake_stop,
            intake,
            classification,
            notification,
            persistence,
            workers,
            transport,
            stats,
        }
    }

    /// Live pipeline counters
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Drain every queue, join every task and close the transport
    pub async fn shutdown(self) -> StatsSnapshot {
        tracing::info!("Pipeline shutting down");

        // 1. No further admissions
        let _ = self.intake_stop.send(true);
        if let Err(e) = self.intake.await {
            tracing::warn!(error = %e, "Intake task ended abnormally");
        }
        tracing::debug!("Intake stopped");

        // 2. Drain classification, which may still fan out downstream
        self.classification.put_stop().await;
        self.classification.join().await;
        tracing::debug!(queue = %self.classification.name(), "Queue drained");

        // 3. Drain both sinks
        tokio::join!(self.notification.put_stop(), self.persistence.put_stop());
        tokio::join!(self.notification.join(), self.persistence.join());
        tracing::debug!("Sink queues drained");

        // 4. Join workers and release the transport
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Stage worker ended abnormally");
            }
        }
        self.transport.close().await;

        let snapshot = self.stats.snapshot();
        tracing::info!(
            received = snapshot.received,
            qualified = snapshot.qualified,
            unqualified = snapshot.unqualified,
            notified = snapshot.notified,
            persisted = snapshot.persisted,
            retries = snapshot.retries,
            dropped_after_stop = snapshot.dropped_after_stop,
            "Pipeline stopped"
        );
        snapshot
    }
}
