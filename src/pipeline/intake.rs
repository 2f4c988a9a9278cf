//! Intake consumer: bridge from the transport into the classification queue
//!
//! Messages are taken one at a time. A message is acknowledged right after
//! its posting is admitted to the classification queue, before the posting
//! is evaluated, so a crash between admission and classification loses it.
//! Messages that do not decode are dead-lettered.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::{PipelineStats, PostingQueue};
use crate::metrics;
use crate::models::Posting;
use crate::transport::{InboundMessage, Transport};
use crate::utils::error::TransportError;
use crate::utils::retry::retry_forever;

/// Consumes the transport queue until told to stop
pub struct IntakeConsumer {
    transport: Arc<dyn Transport>,
    queue: Arc<PostingQueue>,
    stats: Arc<PipelineStats>,
    reconnect_delay: Duration,
}

impl IntakeConsumer {
    pub fn new(
        transport: Arc<dyn Transport>,
        queue: Arc<PostingQueue>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            transport,
            queue,
            stats,
            reconnect_delay: Duration::from_secs(5),
        }
    }

    /// Delay between reconnect attempts after a lost connection
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Consume until `stop` turns true
    ///
    /// The flag is checked between deliveries, so stopping takes at most one
    /// receive window. A reconnect loop in progress is abandoned on stop.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let queue = self.transport.queue().to_string();
        tracing::info!(queue = %queue, "Intake consumer started");

        match self.transport.recover_unacked().await {
            Ok(0) => {}
            Ok(recovered) => {
                tracing::info!(queue = %queue, recovered, "Requeued unacknowledged messages")
            }
            Err(e) => tracing::warn!(queue = %queue, error = %e, "Failed to recover unacknowledged messages"),
        }

        while !*stop.borrow() {
            match self.transport.receive().await {
                Ok(Some(message)) => {
                    if !self.handle(message, &mut stop).await {
                        break;
                    }
                }
                Ok(None) => {}
                Err(TransportError::Closed) => {
                    tracing::info!(queue = %queue, "Transport closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "Receive failed");
                    if !self.reconnect(&mut stop).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(queue = %queue, "Intake consumer stopped");
    }

    /// Returns `false` when a stop interrupted a reconnect
    async fn handle(&self, message: InboundMessage, stop: &mut watch::Receiver<bool>) -> bool {
        PipelineStats::bump(&self.stats.received);

        let posting = match Posting::from_slice(&message.payload) {
            Ok(posting) => posting,
            Err(e) => {
                tracing::warn!(
                    queue = %self.transport.queue(),
                    error = %e,
                    bytes = message.payload.len(),
                    "Undecodable message, dead-lettering"
                );
                metrics::record_dead_letter(self.transport.queue());
                PipelineStats::bump(&self.stats.dead_lettered);
                if let Err(e) = self.transport.dead_letter(&message).await {
                    tracing::warn!(error = %e, "Dead-letter failed");
                    return self.reconnect(stop).await;
                }
                return true;
            }
        };

        let posting_id = posting.id.clone();
        if let Some(evicted) = self.queue.put(posting).await {
            tracing::warn!(
                queue = %self.queue.name(),
                posting_id = %evicted.id,
                "Classification queue full, dropped posting"
            );
            metrics::record_eviction(self.queue.name());
            PipelineStats::bump(&self.stats.evicted);
        }
        tracing::debug!(posting_id = %posting_id, "Posting admitted");

        if let Err(e) = self.transport.ack(&message).await {
            tracing::warn!(posting_id = %posting_id, error = %e, "Ack failed");
            if !self.reconnect(stop).await {
                return false;
            }
            // Left unacknowledged on a second failure; recovered on next startup
            if let Err(e) = self.transport.ack(&message).await {
                tracing::warn!(posting_id = %posting_id, error = %e, "Ack failed after reconnect");
            }
        }
        true
    }

    /// Reconnect until it works or `stop` turns true; `false` if stopped
    async fn reconnect(&self, stop: &mut watch::Receiver<bool>) -> bool {
        let transport = Arc::clone(&self.transport);
        let reconnect = retry_forever(self.reconnect_delay, "transport reconnect", || {
            let transport = Arc::clone(&transport);
            async move { transport.reconnect().await }
        });

        tokio::select! {
            () = reconnect => true,
            () = stopped(stop) => {
                tracing::info!(queue = %self.transport.queue(), "Stop requested during reconnect");
                false
            }
        }
    }
}

/// Resolves once `stop` is true or its sender is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
