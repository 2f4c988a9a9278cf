//! Source crawling: discovery, dedup gating and submission
//!
//! A [`SourceCrawl`] is the [`CrawlTask`] the scheduler runs for one source.
//! Each run walks the source's listings in page order:
//!
//! 1. ask the dedup store whether the id is unseen; seen ids are skipped
//! 2. listings from a blocked company are marked seen and discarded
//! 3. unseen listings are hydrated (detail page) into a [`Posting`]
//! 4. the posting is submitted to the dedup store for processing
//!
//! A failure on one listing is logged and that listing skipped; the next
//! run sees it as unseen again.

pub mod fetcher;
pub mod selector;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::models::{CrawlReport, Posting};
use crate::scheduler::CrawlTask;
use crate::storage::dedup::DedupStore;
use crate::utils::error::ExtractError;

pub use selector::SelectorExtractor;

/// A job found on a listing page, before its detail page is fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Global id: `{native_id}_{source}`
    pub id: String,
    /// Id as the source knows it
    pub native_id: String,
    pub title: String,
    /// Absolute detail page URL
    pub link: String,
    pub company: Option<String>,
    pub location: Option<String>,
}

/// Source-specific discovery and hydration
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Source tag used in ids and logs
    fn source(&self) -> &str;

    /// Fetch the listing page and return listings in page order
    async fn discover(&self) -> Result<Vec<Listing>, ExtractError>;

    /// Fetch the detail page and build the full posting
    async fn hydrate(&self, listing: &Listing) -> Result<Posting, ExtractError>;
}

/// Crawl task for one source
pub struct SourceCrawl {
    name: String,
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn DedupStore>,
    /// Lowercased company names
    blocked: HashSet<String>,
    max_items: usize,
    submit_delay: Duration,
}

impl SourceCrawl {
    pub fn new(extractor: Arc<dyn Extractor>, store: Arc<dyn DedupStore>) -> Self {
        Self {
            name: extractor.source().to_string(),
            extractor,
            store,
            blocked: HashSet::new(),
            max_items: usize::MAX,
            submit_delay: Duration::ZERO,
        }
    }

    /// Build a task with the limits and block list of a source configuration
    pub fn from_config(
        config: &SourceConfig,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn DedupStore>,
    ) -> Self {
        Self::new(extractor, store)
            .with_blocked_companies(config.blocked_companies.iter().cloned())
            .with_max_items(config.max_items)
            .with_submit_delay(Duration::from_millis(config.submit_delay_ms))
    }

    /// Companies whose postings are discarded (case-insensitive)
    pub fn with_blocked_companies<I, S>(mut self, companies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blocked = companies
            .into_iter()
            .map(|c| c.as_ref().trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        self
    }

    /// Cap on listings considered per run
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Pause after each submission
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    fn is_blocked(&self, company: &str) -> bool {
        self.blocked.contains(&company.trim().to_lowercase())
    }

    async fn discard_blocked(&self, id: &str, company: &str, report: &mut CrawlReport) {
        match self.store.mark_seen(id).await {
            Ok(()) => {
                report.blocked += 1;
                tracing::debug!(source = %self.name, id, company, "Blocked company, marked seen");
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(source = %self.name, id, error = %e, "Failed to mark blocked listing");
            }
        }
    }

    async fn process(&self, listing: &Listing, report: &mut CrawlReport) {
        match self.store.is_unseen(&listing.id).await {
            Ok(true) => {}
            Ok(false) => {
                report.skipped_seen += 1;
                tracing::trace!(source = %self.name, id = %listing.id, "Already seen");
                return;
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(source = %self.name, id = %listing.id, error = %e, "Dedup check failed");
                return;
            }
        }

        if let Some(company) = listing.company.as_deref().filter(|c| self.is_blocked(c)) {
            self.discard_blocked(&listing.id, company, report).await;
            return;
        }

        let posting = match self.extractor.hydrate(listing).await {
            Ok(posting) => posting,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(source = %self.name, id = %listing.id, error = %e, "Hydration failed");
                return;
            }
        };

        if self.is_blocked(&posting.company) {
            self.discard_blocked(&posting.id, &posting.company, report).await;
            return;
        }

        match self.store.submit(&posting).await {
            Ok(()) => {
                report.submitted += 1;
                tracing::info!(
                    source = %self.name,
                    id = %posting.id,
                    title = %posting.title,
                    "Posting submitted"
                );
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(source = %self.name, id = %posting.id, error = %e, "Submit failed");
            }
        }

        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
    }
}

#[async_trait]
impl CrawlTask for SourceCrawl {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<CrawlReport> {
        let mut listings = self.extractor.discover().await?;
        listings.truncate(self.max_items);

        let mut report = CrawlReport {
            discovered: listings.len() as u64,
            ..Default::default()
        };

        for listing in &listings {
            self.process(listing, &mut report).await;
        }

        crate::metrics::record_listings(
            &self.name,
            report.discovered,
            report.skipped_seen,
            report.blocked,
            report.submitted,
            report.failed,
        );
        Ok(report)
    }
}
