//! jobscout - Job posting crawler and qualification pipeline
//!
//! Crawls company job boards on randomized intervals, deduplicates postings
//! through an HTTP dedup store, and pushes new postings through a staged
//! pipeline that qualifies them with an LLM and fans qualified ones out to a
//! notification topic and a persistence store.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`scheduler`] - Bounded-concurrency scheduler for recurring crawl tasks
//! - [`crawler`] - Listing extraction with rate limiting
//! - [`storage`] - Dedup store client and posting persistence
//! - [`gateway`] - HTTP dedup store service in front of Redis
//! - [`transport`] - Durable intake queue
//! - [`pipeline`] - Intake, classification and sink stages
//! - [`llm`] - Posting evaluator
//! - [`notifications`] - Notification sinks
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use jobscout::config::Config;
//! use jobscout::scheduler::Scheduler;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let scheduler = Scheduler::new(config.scheduler.max_concurrent_tasks)?;
//!     // scheduler.schedule(task, interval);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod pipeline;
pub mod scheduler;
pub mod storage;
pub mod transport;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, JobscoutErrorTrait, Result};
    pub use crate::models::{CrawlReport, Evaluation, Posting, StoredPosting};
    pub use crate::pipeline::{Pipeline, ShutdownCoordinator};
    pub use crate::scheduler::{CrawlTask, IntervalRange, Scheduler};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
pub use models::{CrawlReport, Evaluation, Posting};
