//! Dedup store client
//!
//! The dedup store remembers which posting ids have already been seen and
//! accepts new postings for processing. The production store is the intake
//! gateway's HTTP API (see [`crate::gateway`]):
//!
//! - `GET /check?key=<id>`: 200 when unseen, any other status when seen
//! - `POST /checked {"id": ...}`: mark seen without submitting
//! - `POST /submit <posting JSON>`: mark seen and enqueue for processing

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::models::Posting;
use crate::utils::error::DedupError;

/// Seen-set plus submission endpoint shared by every crawl task
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Whether `id` has never been seen
    async fn is_unseen(&self, id: &str) -> Result<bool, DedupError>;

    /// Record `id` as seen without submitting anything
    async fn mark_seen(&self, id: &str) -> Result<(), DedupError>;

    /// Submit a new posting for processing
    async fn submit(&self, posting: &Posting) -> Result<(), DedupError>;
}

// ============================================================================
// HTTP client
// ============================================================================

/// [`DedupStore`] backed by the gateway HTTP API
#[derive(Debug, Clone)]
pub struct HttpDedupStore {
    client: Client,
    base_url: Url,
}

impl HttpDedupStore {
    /// Create a client for the store at `base_url`
    ///
    /// Endpoints resolve under the full base path, with or without a trailing
    /// slash: `http://host/api` and `http://host/api/` both reach `/api/check`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DedupError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| DedupError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DedupError> {
        self.base_url
            .join(path)
            .map_err(|e| DedupError::InvalidUrl(e.to_string()))
    }
}

#[async_trait]
impl DedupStore for HttpDedupStore {
    async fn is_unseen(&self, id: &str) -> Result<bool, DedupError> {
        let response = self
            .client
            .get(self.endpoint("check")?)
            .query(&[("key", id)])
            .send()
            .await?;

        let unseen = response.status() == StatusCode::OK;
        tracing::trace!(id, status = response.status().as_u16(), unseen, "Dedup check");
        Ok(unseen)
    }

    async fn mark_seen(&self, id: &str) -> Result<(), DedupError> {
        let response = self
            .client
            .post(self.endpoint("checked")?)
            .json(&serde_json::json!({ "id": id }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DedupError::Rejected {
                operation: "checked",
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn submit(&self, posting: &Posting) -> Result<(), DedupError> {
        let response = self
            .client
            .post(self.endpoint("submit")?)
            .json(posting)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DedupError::Rejected {
                operation: "submit",
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory [`DedupStore`] recording submissions, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    seen: Mutex<HashSet<String>>,
    submitted: Mutex<Vec<Posting>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed ids as already seen
    pub fn with_seen<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        if let Ok(mut seen) = store.seen.lock() {
            seen.extend(ids.into_iter().map(Into::into));
        }
        store
    }

    /// Whether `id` is in the seen set
    pub fn contains(&self, id: &str) -> bool {
        self.seen.lock().map(|s| s.contains(id)).unwrap_or(false)
    }

    /// Postings submitted so far, in order
    pub fn submitted(&self) -> Vec<Posting> {
        self.submitted
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn is_unseen(&self, id: &str) -> Result<bool, DedupError> {
        Ok(!self.contains(id))
    }

    async fn mark_seen(&self, id: &str) -> Result<(), DedupError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.insert(id.to_string());
        }
        Ok(())
    }

    async fn submit(&self, posting: &Posting) -> Result<(), DedupError> {
        self.mark_seen(&posting.id).await?;
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(posting.clone());
        }
        Ok(())
    }
}
