//! Review of stored postings
//!
//! Persisted postings start out unprocessed. A reviewer lists the pending
//! ones, newest first, and marks them processed once handled.

use std::io::Write;

use crate::error::Result;
use crate::models::StoredPosting;
use crate::storage::PostingStore;

/// Outcome of marking a batch of ids reviewed
#[derive(Debug, Default, PartialEq)]
pub struct MarkSummary {
    pub marked: Vec<String>,
    pub missing: Vec<String>,
}

/// One block per record: a header line, then the link and reasoning indented
pub fn format_record(record: &StoredPosting) -> String {
    let verdict = if record.is_qualified { "qualified" } else { "rejected" };
    format!(
        "{}  {}  {} ({})  [{}]\n    {}\n    {}\n",
        record.inserted_at.format("%Y-%m-%d %H:%M"),
        record.id,
        record.title,
        record.company,
        verdict,
        record.link,
        record.reasoning.replace('\n', " "),
    )
}

/// Write up to `limit` pending records to `out`; returns how many were written
pub async fn write_pending(
    store: &dyn PostingStore,
    limit: usize,
    out: &mut impl Write,
) -> Result<usize> {
    let pending = store.list_unprocessed(limit).await?;
    for record in &pending {
        out.write_all(format_record(record).as_bytes())?;
    }
    Ok(pending.len())
}

/// Mark each id processed, stopping at the first store error
pub async fn mark_reviewed(store: &dyn PostingStore, ids: &[String]) -> Result<MarkSummary> {
    let mut summary = MarkSummary::default();
    for id in ids {
        if store.mark_processed(id).await? {
            tracing::debug!(posting_id = %id, "Marked reviewed");
            summary.marked.push(id.clone());
        } else {
            summary.missing.push(id.clone());
        }
    }
    Ok(summary)
}
