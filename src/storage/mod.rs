//! Storage collaborators
//!
//! - [`dedup`]: the seen-set and submission endpoint used by crawl tasks
//! - [`postings`]: persistence of evaluated postings
//! - [`review`]: listing and marking persisted postings for review

pub mod dedup;
pub mod postings;
pub mod review;

pub use dedup::{DedupStore, HttpDedupStore, MemoryDedupStore};
pub use postings::{MemoryPostingStore, PostgresPostingStore, PostingStore};
