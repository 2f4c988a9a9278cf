//! Crawl task contract and re-run intervals

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

use super::error::{SchedulerError, SchedulerResult};
use crate::models::CrawlReport;

/// A unit of crawl work the scheduler runs repeatedly
///
/// One run discovers listings, filters them and submits new postings. An
/// `Err` (or a panic) fails only this run; the task is rescheduled as usual.
#[async_trait]
pub trait CrawlTask: Send + Sync {
    /// Task name for logs and metrics
    fn name(&self) -> &str;

    /// Execute one run
    async fn run(&self) -> anyhow::Result<CrawlReport>;
}

/// Inclusive range the delay before the next run is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalRange {
    min: Duration,
    max: Duration,
}

impl IntervalRange {
    /// Create a range; `min` must not exceed `max`
    pub fn new(min: Duration, max: Duration) -> SchedulerResult<Self> {
        if min > max {
            return Err(SchedulerError::invalid_interval(
                min.as_secs(),
                max.as_secs(),
            ));
        }
        Ok(Self { min, max })
    }

    /// Create a range from whole seconds
    pub fn from_secs(min_secs: u64, max_secs: u64) -> SchedulerResult<Self> {
        Self::new(Duration::from_secs(min_secs), Duration::from_secs(max_secs))
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draw a delay uniformly from `[min, max]` at millisecond resolution
    pub fn sample(&self) -> Duration {
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        if min_ms == max_ms {
            return self.min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }
}
