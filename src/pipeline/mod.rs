//! Posting processing pipeline
//!
//! Postings arrive on the intake transport and flow through three stages,
//! each a single tokio task reading from its own [`StageQueue`]:
//!
//! ```text
//! ┌───────────┐  drop-oldest  ┌────────────────┐  block  ┌──────────────┐
//! │  Intake   │──────────────▶│ Classification │────────▶│ Notification │
//! │ Consumer  │               │     Stage      │         └──────────────┘
//! └───────────┘               └────────────────┘  block  ┌──────────────┐
//!       ▲                             │─────────────────▶│ Persistence  │
//!   transport                         ▼                  └──────────────┘
//!                              not qualified: dropped
//! ```
//!
//! A stage that fails on a posting sleeps for the retry delay and puts the
//! posting back at the tail of its own queue. Retries are unbounded.
//!
//! # Example
//!
//! ```rust,ignore
//! let coordinator = Pipeline::new(config.pipeline.clone(), transport, evaluator, sink, store)
//!     .with_topic(&config.notification.topic)
//!     .start();
//! shutdown_signal.await;
//! let stats = coordinator.shutdown().await;
//! ```

pub mod classify;
pub mod intake;
pub mod queue;
pub mod shutdown;
pub mod sinks;
pub mod stats;

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::error::{Error, JobscoutErrorTrait};
use crate::llm::Evaluator;
use crate::metrics;
use crate::models::Posting;
use crate::notifications::NotificationSink;
use crate::storage::PostingStore;
use crate::transport::Transport;

pub use classify::ClassificationStage;
pub use intake::IntakeConsumer;
pub use queue::{Delivery, Overflow, StageQueue};
pub use shutdown::ShutdownCoordinator;
pub use sinks::{NotificationStage, PersistenceStage};
pub use stats::{PipelineStats, StatsSnapshot};

/// Queue of postings between two stages
pub type PostingQueue = StageQueue<Posting>;

/// Queue names, also used as metrics labels
pub const CLASSIFICATION_QUEUE: &str = "classification";
pub const NOTIFICATION_QUEUE: &str = "notification";
pub const PERSISTENCE_QUEUE: &str = "persistence";

/// Work done on one posting by a pipeline stage
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name for logs and metrics
    fn name(&self) -> &'static str;

    /// Process one posting; an error puts it back for a delayed retry
    async fn process(&self, posting: &Posting) -> crate::Result<()>;
}

/// Single worker draining one queue through one [`Stage`]
pub struct StageWorker {
    stage: Arc<dyn Stage>,
    input: Arc<PostingQueue>,
    retry_delay: Duration,
    stats: Arc<PipelineStats>,
}

impl StageWorker {
    pub fn new(
        stage: Arc<dyn Stage>,
        input: Arc<PostingQueue>,
        retry_delay: Duration,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            stage,
            input,
            retry_delay,
            stats,
        }
    }

    /// Run on a new tokio task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process postings until the stop marker
    pub async fn run(self) {
        let stage = self.stage.name();
        tracing::info!(stage, queue = %self.input.name(), "Stage worker started");

        loop {
            metrics::set_queue_depth(self.input.name(), self.input.len());

            let posting = match self.input.get().await {
                Delivery::Item(posting) => posting,
                Delivery::Stop => {
                    self.finish();
                    break;
                }
            };

            let outcome = AssertUnwindSafe(self.stage.process(&posting))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(Error::other(format!("{stage} stage panicked"))));

            match outcome {
                Ok(()) => {
                    metrics::record_stage_outcome(stage, "done");
                    self.input.task_done();
                }
                Err(e) => {
                    tracing::warn!(
                        stage,
                        posting_id = %posting.id,
                        category = e.category().as_str(),
                        error = %e,
                        retry_in_secs = self.retry_delay.as_secs(),
                        "Stage failed, requeueing posting"
                    );
                    metrics::record_stage_outcome(stage, "retry");
                    PipelineStats::bump(&self.stats.retries);
                    tokio::time::sleep(self.retry_delay).await;
                    self.requeue(posting);
                }
            }
        }

        tracing::info!(stage, "Stage worker stopped");
    }

    fn requeue(&self, posting: Posting) {
        match self.input.requeue(posting) {
            Ok(None) => {}
            Ok(Some(evicted)) => {
                tracing::warn!(
                    queue = %self.input.name(),
                    posting_id = %evicted.id,
                    "Queue full on requeue, evicted oldest posting"
                );
                metrics::record_eviction(self.input.name());
                PipelineStats::bump(&self.stats.evicted);
            }
            Err(refused) => self.dropped_after_stop(&refused),
        }
    }

    /// Close the input after its stop marker and account for leftovers
    fn finish(&self) {
        for posting in self.input.close() {
            self.dropped_after_stop(&posting);
        }
        self.input.task_done();
    }

    fn dropped_after_stop(&self, posting: &Posting) {
        tracing::warn!(
            stage = self.stage.name(),
            posting_id = %posting.id,
            "Posting arrived after stop, dropping"
        );
        PipelineStats::bump(&self.stats.dropped_after_stop);
    }
}

/// Builder wiring the queues, stages and intake together
pub struct Pipeline {
    config: PipelineConfig,
    topic: String,
    reconnect_delay: Duration,
    transport: Arc<dyn Transport>,
    evaluator: Arc<dyn Evaluator>,
    sink: Arc<dyn NotificationSink>,
    store: Arc<dyn PostingStore>,
}

impl Pipeline {
    /// `evaluator` is used as given; wrap it in a
    /// [`crate::llm::RateLimitedEvaluator`] to apply the call quota.
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
        evaluator: Arc<dyn Evaluator>,
        sink: Arc<dyn NotificationSink>,
        store: Arc<dyn PostingStore>,
    ) -> Self {
        Self {
            config,
            topic: String::from("qualified-jobs"),
            reconnect_delay: Duration::from_secs(5),
            transport,
            evaluator,
            sink,
            store,
        }
    }

    /// Notification topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Delay between transport reconnect attempts
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Spawn the intake consumer and the stage workers
    pub fn start(self) -> ShutdownCoordinator {
        let stats = PipelineStats::new();
        let retry_delay = self.config.retry_delay();

        let classification = Arc::new(PostingQueue::new(
            CLASSIFICATION_QUEUE,
            self.config.intake_capacity,
            Overflow::DropOldest,
        ));
        let notification = Arc::new(PostingQueue::new(
            NOTIFICATION_QUEUE,
            self.config.notification_capacity,
            Overflow::Block,
        ));
        let persistence = Arc::new(PostingQueue::new(
            PERSISTENCE_QUEUE,
            self.config.persistence_capacity,
            Overflow::Block,
        ));

        let stages: [(Arc<dyn Stage>, &Arc<PostingQueue>); 3] = [
            (
                Arc::new(ClassificationStage::new(
                    self.evaluator,
                    Arc::clone(&notification),
                    Arc::clone(&persistence),
                    Arc::clone(&stats),
                )),
                &classification,
            ),
            (
                Arc::new(NotificationStage::new(self.sink, self.topic.clone(), Arc::clone(&stats))),
                &notification,
            ),
            (
                Arc::new(PersistenceStage::new(self.store, Arc::clone(&stats))),
                &persistence,
            ),
        ];
        let workers = stages
            .into_iter()
            .map(|(stage, queue)| {
                StageWorker::new(stage, Arc::clone(queue), retry_delay, Arc::clone(&stats)).spawn()
            })
            .collect();

        let (stop_tx, stop_rx) = watch::channel(false);
        let intake = IntakeConsumer::new(
            Arc::clone(&self.transport),
            Arc::clone(&classification),
            Arc::clone(&stats),
        )
        .with_reconnect_delay(self.reconnect_delay);
        let intake_handle = tokio::spawn(intake.run(stop_rx));

        tracing::info!(
            queue = %self.transport.queue(),
            topic = %self.topic,
            intake_capacity = self.config.intake_capacity,
            retry_delay_secs = self.config.retry_delay_secs,
            "Pipeline started"
        );

        ShutdownCoordinator::new(
            stop_tx,
            intake_handle,
            classification,
            notification,
            persistence,
            workers,
            self.transport,
            stats,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Stage for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn process(&self, _posting: &Posting) -> crate::Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Error::other("boom"));
            }
            Ok(())
        }
    }

    struct Panicky;

    #[async_trait]
    impl Stage for Panicky {
        fn name(&self) -> &'static str {
            "panicky"
        }

        async fn process(&self, posting: &Posting) -> crate::Result<()> {
            if posting.id == "bad" {
                panic!("cannot handle");
            }
            Ok(())
        }
    }

    fn posting(id: &str) -> Posting {
        Posting::new(id, "Engineer", "Acme", "https://x", "desc")
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_behind_stop_marker_is_dropped() {
        let queue = Arc::new(PostingQueue::new("q", 4, Overflow::Block));
        let stats = PipelineStats::new();
        let stage = Arc::new(Flaky {
            failures: 3,
            calls: AtomicU32::new(0),
        });
        let worker = StageWorker::new(
            stage.clone(),
            Arc::clone(&queue),
            Duration::from_secs(5),
            Arc::clone(&stats),
        )
        .spawn();

        queue.put(posting("1_a")).await;
        let started = tokio::time::Instant::now();
        queue.put_stop().await;
        queue.join().await;
        worker.await.unwrap();

        // The stop marker was queued behind the first attempt, so the
        // requeued posting landed after it and was dropped
        assert_eq!(stage.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().dropped_after_stop, 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let queue = Arc::new(PostingQueue::new("q", 4, Overflow::Block));
        let stats = PipelineStats::new();
        let stage = Arc::new(Flaky {
            failures: 3,
            calls: AtomicU32::new(0),
        });
        let worker = StageWorker::new(
            stage.clone(),
            Arc::clone(&queue),
            Duration::from_secs(5),
            Arc::clone(&stats),
        )
        .spawn();

        queue.put(posting("1_a")).await;
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(stage.calls.load(Ordering::SeqCst), 4);
        assert_eq!(stats.snapshot().retries, 3);

        queue.put_stop().await;
        queue.join().await;
        worker.await.unwrap();
        assert_eq!(stats.snapshot().dropped_after_stop, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_stage_keeps_worker_alive() {
        let queue = Arc::new(PostingQueue::new("q", 4, Overflow::Block));
        let stats = PipelineStats::new();
        let worker = StageWorker::new(
            Arc::new(Panicky),
            Arc::clone(&queue),
            Duration::from_secs(1),
            Arc::clone(&stats),
        )
        .spawn();

        queue.put(posting("bad")).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        queue.put(posting("good")).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(!worker.is_finished());
        assert!(stats.snapshot().retries >= 2);
    }
}
