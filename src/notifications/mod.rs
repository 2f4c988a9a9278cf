//! Notification sinks for qualified postings
//!
//! A [`NotificationSink`] publishes a JSON document to a named topic.
//! Implementations:
//!
//! - [`topic::RedisTopicPublisher`]: Redis `PUBLISH topic json`
//! - [`webhook::WebhookPublisher`]: HTTP POST with the topic in a header
//! - [`MemoryPublisher`]: records publications in memory

pub mod topic;
pub mod webhook;

use async_trait::async_trait;
use std::sync::Mutex;

use crate::utils::error::SinkError;

pub use topic::RedisTopicPublisher;
pub use webhook::{WebhookConfig, WebhookPublisher};

/// Publishes serialized postings to a topic
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publish `payload` (a JSON document) to `topic`
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), SinkError>;

    /// Sink name for logs
    fn name(&self) -> &'static str;
}

/// One recorded publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
}

/// In-memory [`NotificationSink`] for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<Publication>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order
    pub fn published(&self) -> Vec<Publication> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), SinkError> {
        if let Ok(mut published) = self.published.lock() {
            published.push(Publication {
                topic: topic.to_string(),
                payload: payload.to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
