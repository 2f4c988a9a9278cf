// Core data structures for the jobscout pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One job posting flowing through the pipeline
///
/// Created by an extractor, enriched exactly once by the classification
/// stage (`evaluation`), immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    /// Globally unique id: `{native_id}_{source}`
    pub id: String,
    pub title: String,
    pub company: String,
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Posting {
    /// Create a posting stamped with the current time
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
        link: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            company: company.into(),
            link: link.into(),
            description: description.into(),
            location: None,
            evaluation: None,
            received_at: Utc::now(),
        }
    }

    /// Compose the global id from a source-native id and the source tag
    pub fn compose_id(native_id: &str, source: &str) -> String {
        format!("{}_{}", native_id.trim(), source)
    }

    /// Set the location
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Attach the evaluation, returning the enriched posting
    ///
    /// An evaluation already present is kept; a posting is enriched only once.
    pub fn with_evaluation(mut self, evaluation: Evaluation) -> Self {
        if self.evaluation.is_none() {
            self.evaluation = Some(evaluation);
        }
        self
    }

    /// Whether the attached evaluation qualified this posting
    pub fn is_qualified(&self) -> bool {
        self.evaluation.as_ref().is_some_and(|e| e.is_qualified)
    }

    /// Decode a posting from a transport payload
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        let posting: Self = serde_json::from_slice(payload)?;
        posting.validate()?;
        Ok(posting)
    }

    /// Check the fields every downstream stage relies on
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.id.trim().is_empty() {
            return Err(DecodeError::MissingField("id"));
        }
        if self.title.trim().is_empty() {
            return Err(DecodeError::MissingField("title"));
        }
        if self.link.trim().is_empty() {
            return Err(DecodeError::MissingField("link"));
        }
        Ok(())
    }
}

/// Result of scoring a posting against the qualification criteria
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Evaluation {
    pub reasoning: String,
    pub is_qualified: bool,
}

/// Inbound payload that could not become a [`Posting`]
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed posting JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("posting field '{0}' is empty")]
    MissingField(&'static str),
}

/// Row shape written by the persistence stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPosting {
    pub id: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub company: String,
    pub reasoning: String,
    pub is_qualified: bool,
    pub inserted_at: DateTime<Utc>,
    pub processed: bool,
}

impl StoredPosting {
    /// Build the stored row for an evaluated posting, stamping the write time
    pub fn from_posting(posting: &Posting, inserted_at: DateTime<Utc>) -> Option<Self> {
        let evaluation = posting.evaluation.as_ref()?;
        Some(Self {
            id: posting.id.clone(),
            title: posting.title.clone(),
            description: posting.description.clone(),
            link: posting.link.clone(),
            company: posting.company.clone(),
            reasoning: evaluation.reasoning.clone(),
            is_qualified: evaluation.is_qualified,
            inserted_at,
            processed: false,
        })
    }
}

/// Per-run counts reported by a crawl task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlReport {
    /// Listings found on the listing page (after the per-run cap)
    pub discovered: u64,
    /// Listings the dedup store had already seen
    pub skipped_seen: u64,
    /// Listings from a blocked company, marked seen and discarded
    pub blocked: u64,
    /// Postings submitted for processing
    pub submitted: u64,
    /// Listings whose hydration or submission failed
    pub failed: u64,
}

impl std::fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "discovered={} seen={} blocked={} submitted={} failed={}",
            self.discovered, self.skipped_seen, self.blocked, self.submitted, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Posting {
        Posting::new(
            "42_apple",
            "Software Engineer",
            "Apple",
            "https://jobs.apple.com/42",
            "2 years experience, remote",
        )
    }

    #[test]
    fn test_compose_id() {
        assert_eq!(Posting::compose_id(" 42 ", "apple"), "42_apple");
    }

    #[test]
    fn test_evaluation_attached_once() {
        let first = Evaluation {
            reasoning: "matches".into(),
            is_qualified: true,
        };
        let second = Evaluation {
            reasoning: "overwritten".into(),
            is_qualified: false,
        };
        let posting = sample().with_evaluation(first.clone()).with_evaluation(second);
        assert_eq!(posting.evaluation, Some(first));
        assert!(posting.is_qualified());
    }

    #[test]
    fn test_decode_defaults_received_at() {
        let payload = br#"{"id":"7_indeed","title":"Backend Developer","company":"Acme","link":"https://indeed.com/7","description":"Go"}"#;
        let posting = Posting::from_slice(payload).unwrap();
        assert_eq!(posting.id, "7_indeed");
        assert!(posting.evaluation.is_none());
        assert!(posting.location.is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Posting::from_slice(b"not json"),
            Err(DecodeError::Json(_))
        ));
        let empty_id = br#"{"id":" ","title":"t","company":"c","link":"l"}"#;
        assert!(matches!(
            Posting::from_slice(empty_id),
            Err(DecodeError::MissingField("id"))
        ));
    }

    #[test]
    fn test_evaluation_schema_is_strict() {
        let extra = r#"{"reasoning":"ok","is_qualified":true,"score":3}"#;
        assert!(serde_json::from_str::<Evaluation>(extra).is_err());
        let wrong_type = r#"{"reasoning":"ok","is_qualified":"yes"}"#;
        assert!(serde_json::from_str::<Evaluation>(wrong_type).is_err());
    }

    #[test]
    fn test_stored_posting_requires_evaluation() {
        let now = Utc::now();
        assert!(StoredPosting::from_posting(&sample(), now).is_none());

        let evaluated = sample().with_evaluation(Evaluation {
            reasoning: "remote junior role".into(),
            is_qualified: true,
        });
        let row = StoredPosting::from_posting(&evaluated, now).unwrap();
        assert_eq!(row.id, "42_apple");
        assert!(!row.processed);
        assert_eq!(row.inserted_at, now);
    }
}
