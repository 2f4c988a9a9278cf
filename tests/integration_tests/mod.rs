//! Integration tests module
//!
//! End-to-end tests for the jobscout crawl and processing sides, all run
//! against in-memory collaborators or local mock servers.

pub mod fixtures;
pub mod ingestion_test;
pub mod pipeline_test;
pub mod scheduler_test;
pub mod shutdown_test;
