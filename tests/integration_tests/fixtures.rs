//! Test fixtures for integration tests
//!
//! Provides sample HTML, postings and scripted collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobscout::config::PipelineConfig;
use jobscout::llm::Evaluator;
use jobscout::models::{Evaluation, Posting, StoredPosting};
use jobscout::notifications::{MemoryPublisher, NotificationSink};
use jobscout::storage::{MemoryPostingStore, PostingStore};
use jobscout::utils::error::{EvaluatorError, SinkError};

/// Listing page in the markup of the sample source
pub const LISTING_HTML: &str = r#"
<html>
<body>
  <table>
    <tbody id="accordion_200001">
      <tr><td><a class="job-title" href="/details/200001">Software Engineer</a></td>
          <td class="company">Apple</td><td class="location">Cupertino</td></tr>
    </tbody>
    <tbody id="accordion_200002">
      <tr><td><a class="job-title" href="/details/200002">Senior Staff Engineer</a></td>
          <td class="company">Apple</td><td class="location">Austin</td></tr>
    </tbody>
    <tbody id="accordion_200003">
      <tr><td><a class="job-title" href="/details/200003">QA Contractor</a></td>
          <td class="company">Staffing Partners Inc</td><td class="location">Remote</td></tr>
    </tbody>
  </table>
</body>
</html>
"#;

/// Detail page for any listing
pub const DETAIL_HTML: &str = r#"
<html>
<body>
  <div id="summary">Build services used by millions.</div>
  <div id="qualifications">
    2 years experience
    remote friendly
  </div>
</body>
</html>
"#;

/// Source configuration matching [`LISTING_HTML`]
pub fn source_toml(listing_url: &str) -> String {
    format!(
        r##"
name = "apple"
listing_url = "{listing_url}"
requests_per_second = 50
blocked_companies = ["staffing partners inc"]

[selectors]
item = "tbody[id^='accordion_']"
id_attr = "id"
id_pattern = "_(\\d+)$"
title = "a.job-title"
link = "a.job-title"
company = "td.company"
location = "td.location"
description = ["#summary", "#qualifications"]
"##
    )
}

pub fn posting(id: &str, title: &str, description: &str) -> Posting {
    Posting::new(
        id,
        title,
        "Acme",
        format!("https://jobs.example.com/{id}"),
        description,
    )
}

pub fn fast_pipeline_config(intake_capacity: usize) -> PipelineConfig {
    PipelineConfig {
        intake_capacity,
        notification_capacity: 4,
        persistence_capacity: 4,
        retry_delay_secs: 1,
    }
}

/// Shared, ordered record of collaborator calls
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Evaluator qualifying titles containing a keyword, with scripted failures
pub struct ScriptedEvaluator {
    keyword: String,
    /// Remaining failures per title
    failures: Mutex<HashMap<String, u32>>,
    delay: Duration,
    log: EventLog,
}

impl ScriptedEvaluator {
    pub fn new(keyword: &str, log: EventLog) -> Self {
        Self {
            keyword: keyword.to_string(),
            failures: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            log,
        }
    }

    /// Fail the first `times` evaluations of `title`
    pub fn failing(self, title: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(title.to_string(), times);
        self
    }

    /// Take `delay` per evaluation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(&self, title: &str, _description: &str) -> Result<Evaluation, EvaluatorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(title) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            self.log.push(format!("evaluate-failed:{title}"));
            return Err(EvaluatorError::Status(503));
        }

        self.log.push(format!("evaluate-ok:{title}"));
        let is_qualified = title.contains(&self.keyword);
        Ok(Evaluation {
            reasoning: if is_qualified {
                format!("title mentions {}", self.keyword)
            } else {
                String::from("experience requirement too high")
            },
            is_qualified,
        })
    }
}

/// Sink recording publications into a [`MemoryPublisher`] and an event log
pub struct LoggingSink {
    pub inner: MemoryPublisher,
    log: EventLog,
}

impl LoggingSink {
    pub fn new(log: EventLog) -> Self {
        Self {
            inner: MemoryPublisher::new(),
            log,
        }
    }
}

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), SinkError> {
        let posting: Posting = serde_json::from_str(payload)?;
        self.log.push(format!("publish:{}", posting.id));
        self.inner.publish(topic, payload).await
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

/// Posting store that takes `delay` per write
pub struct SlowStore {
    pub inner: MemoryPostingStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryPostingStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl PostingStore for SlowStore {
    async fn upsert(&self, posting: &Posting) -> Result<(), SinkError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(posting).await
    }

    async fn get(&self, id: &str) -> Result<Option<StoredPosting>, SinkError> {
        self.inner.get(id).await
    }

    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<StoredPosting>, SinkError> {
        self.inner.list_unprocessed(limit).await
    }

    async fn count_unprocessed(&self) -> Result<u64, SinkError> {
        self.inner.count_unprocessed().await
    }

    async fn mark_processed(&self, id: &str) -> Result<bool, SinkError> {
        self.inner.mark_processed(id).await
    }
}
