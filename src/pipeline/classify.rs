//! Classification stage: score postings and fan qualified ones out

use async_trait::async_trait;
use std::sync::Arc;

use super::{PipelineStats, PostingQueue, Stage};
use crate::llm::Evaluator;
use crate::metrics;
use crate::models::Posting;

/// Evaluates each posting; qualified ones go to both downstream queues
pub struct ClassificationStage {
    evaluator: Arc<dyn Evaluator>,
    notification: Arc<PostingQueue>,
    persistence: Arc<PostingQueue>,
    stats: Arc<PipelineStats>,
}

impl ClassificationStage {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        notification: Arc<PostingQueue>,
        persistence: Arc<PostingQueue>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            evaluator,
            notification,
            persistence,
            stats,
        }
    }
}

#[async_trait]
impl Stage for ClassificationStage {
    fn name(&self) -> &'static str {
        "classification"
    }

    async fn process(&self, posting: &Posting) -> crate::Result<()> {
        let evaluation = self
            .evaluator
            .evaluate(&posting.title, &posting.description)
            .await?;
        let enriched = posting.clone().with_evaluation(evaluation);

        if !enriched.is_qualified() {
            tracing::info!(
                posting_id = %enriched.id,
                company = %enriched.company,
                reasoning = enriched.evaluation.as_ref().map(|e| e.reasoning.as_str()).unwrap_or_default(),
                "Posting not qualified, dropping"
            );
            metrics::record_stage_outcome(self.name(), "unqualified");
            PipelineStats::bump(&self.stats.unqualified);
            return Ok(());
        }

        tracing::info!(
            posting_id = %enriched.id,
            company = %enriched.company,
            title = %enriched.title,
            "Posting qualified"
        );
        metrics::record_stage_outcome(self.name(), "qualified");
        PipelineStats::bump(&self.stats.qualified);

        // Both queues block when full; neither ever evicts
        self.notification.put(enriched.clone()).await;
        self.persistence.put(enriched).await;
        Ok(())
    }
}
