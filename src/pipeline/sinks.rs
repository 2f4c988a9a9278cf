//! Terminal stages: publish and persist qualified postings

use async_trait::async_trait;
use std::sync::Arc;

use super::{PipelineStats, Stage};
use crate::models::Posting;
use crate::notifications::NotificationSink;
use crate::storage::PostingStore;

/// Publishes each posting as JSON to the notification topic
pub struct NotificationStage {
    sink: Arc<dyn NotificationSink>,
    topic: String,
    stats: Arc<PipelineStats>,
}

impl NotificationStage {
    pub fn new(sink: Arc<dyn NotificationSink>, topic: String, stats: Arc<PipelineStats>) -> Self {
        Self { sink, topic, stats }
    }
}

#[async_trait]
impl Stage for NotificationStage {
    fn name(&self) -> &'static str {
        "notification"
    }

    async fn process(&self, posting: &Posting) -> crate::Result<()> {
        let payload = serde_json::to_string(posting)?;
        self.sink.publish(&self.topic, &payload).await?;

        tracing::debug!(
            posting_id = %posting.id,
            sink = self.sink.name(),
            topic = %self.topic,
            "Posting published"
        );
        PipelineStats::bump(&self.stats.notified);
        Ok(())
    }
}

/// Upserts each posting into the posting store
pub struct PersistenceStage {
    store: Arc<dyn PostingStore>,
    stats: Arc<PipelineStats>,
}

impl PersistenceStage {
    pub fn new(store: Arc<dyn PostingStore>, stats: Arc<PipelineStats>) -> Self {
        Self { store, stats }
    }
}

#[async_trait]
impl Stage for PersistenceStage {
    fn name(&self) -> &'static str {
        "persistence"
    }

    async fn process(&self, posting: &Posting) -> crate::Result<()> {
        self.store.upsert(posting).await?;

        tracing::debug!(posting_id = %posting.id, "Posting persisted");
        PipelineStats::bump(&self.stats.persisted);
        Ok(())
    }
}
