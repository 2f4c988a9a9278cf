use anyhow::{Context, Result};

use jobscout::config::Config;
use jobscout::storage::review::{mark_reviewed, write_pending};
use jobscout::storage::{PostgresPostingStore, PostingStore};

/// What `review` does against the postings table
pub enum ReviewAction {
    List { limit: usize },
    Count,
    Mark { ids: Vec<String> },
}

/// List, count or mark persisted postings
pub async fn review(config: Config, action: ReviewAction) -> Result<()> {
    let store = PostgresPostingStore::new(&config.persistence)?;
    store
        .ensure_schema()
        .await
        .context("Failed to prepare the postings table")?;

    match action {
        ReviewAction::List { limit } => {
            let mut listing = Vec::new();
            let written = write_pending(&store, limit, &mut listing).await?;
            print!("{}", String::from_utf8_lossy(&listing));
            println!();
            println!("{written} pending posting(s) shown");
        }
        ReviewAction::Count => {
            let pending = store.count_unprocessed().await?;
            println!("Pending review: {pending}");
        }
        ReviewAction::Mark { ids } => {
            let summary = mark_reviewed(&store, &ids).await?;
            println!("Marked reviewed: {}", summary.marked.len());
            for id in &summary.missing {
                tracing::warn!(posting_id = %id, "No stored posting with this id");
            }
        }
    }

    Ok(())
}
