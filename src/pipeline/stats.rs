//! Pipeline statistics shared by every stage

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pipeline counters (thread-safe)
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Messages taken from the transport
    pub received: AtomicU64,

    /// Messages dead-lettered because they did not decode
    pub dead_lettered: AtomicU64,

    /// Postings evicted from the classification queue
    pub evicted: AtomicU64,

    /// Postings the evaluator qualified
    pub qualified: AtomicU64,

    /// Postings the evaluator rejected
    pub unqualified: AtomicU64,

    /// Postings published to the notification topic
    pub notified: AtomicU64,

    /// Postings written to the persistence store
    pub persisted: AtomicU64,

    /// Failed attempts put back for retry, all stages
    pub retries: AtomicU64,

    /// Postings dropped because their queue had already stopped
    pub dropped_after_stop: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            qualified: self.qualified.load(Ordering::Relaxed),
            unqualified: self.unqualified.load(Ordering::Relaxed),
            notified: self.notified.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dropped_after_stop: self.dropped_after_stop.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub dead_lettered: u64,
    pub evicted: u64,
    pub qualified: u64,
    pub unqualified: u64,
    pub notified: u64,
    pub persisted: u64,
    pub retries: u64,
    pub dropped_after_stop: u64,
}

impl StatsSnapshot {
    /// Share of evaluated postings that qualified (0.0 - 1.0)
    pub fn qualification_rate(&self) -> f64 {
        let evaluated = self.qualified + self.unqualified;
        if evaluated == 0 {
            return 0.0;
        }
        self.qualified as f64 / evaluated as f64
    }
}
