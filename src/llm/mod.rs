//! Posting evaluator backed by an LLM
//!
//! The evaluator scores a posting's title and description against the
//! configured qualification criteria and returns a schema-checked
//! [`Evaluation`]. The production implementation talks to an
//! Ollama-compatible `/api/generate` endpoint in JSON mode.
//!
//! Calls are throttled by a process-wide [`RateLimitedEvaluator`]: every
//! classification worker shares one limiter, and calls beyond the quota wait.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EvaluatorConfig;
use crate::models::Evaluation;
use crate::utils::error::EvaluatorError;
use crate::utils::truncate_text;

/// Longest description sent to the model, in characters
const MAX_DESCRIPTION_CHARS: usize = 8000;

/// Sampling temperature; low for stable verdicts
const TEMPERATURE: f32 = 0.1;

/// Token budget for the JSON verdict
const MAX_TOKENS: u32 = 512;

/// Scores a posting against the qualification criteria
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, title: &str, description: &str) -> Result<Evaluation, EvaluatorError>;
}

// ============================================================================
// Ollama
// ============================================================================

/// Ollama generate request
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

/// Ollama generation options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama generate response
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// [`Evaluator`] calling an Ollama-compatible endpoint
pub struct OllamaEvaluator {
    client: Client,
    config: EvaluatorConfig,
}

impl OllamaEvaluator {
    pub fn new(config: EvaluatorConfig) -> Result<Self, EvaluatorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// Check if the model server answers
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(&url)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    fn build_prompt(&self, title: &str, description: &str) -> String {
        format!(
            r#"You screen job postings for a candidate.

## Criteria
{criteria}

## Posting
Title: {title}

{description}

## Answer
Reply with a single JSON object and nothing else:
{{"reasoning": "<one or two sentences>", "is_qualified": <true|false>}}"#,
            criteria = self.config.criteria,
            description = truncate_text(description, MAX_DESCRIPTION_CHARS),
        )
    }

    async fn generate(&self, prompt: String) -> Result<String, EvaluatorError> {
        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        let request = OllamaRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: TEMPERATURE,
                num_predict: MAX_TOKENS,
            },
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(EvaluatorError::Status(response.status().as_u16()));
        }

        let body: OllamaResponse = response.json().await?;
        if body.response.trim().is_empty() {
            return Err(EvaluatorError::EmptyResponse);
        }
        Ok(body.response)
    }
}

#[async_trait]
impl Evaluator for OllamaEvaluator {
    async fn evaluate(&self, title: &str, description: &str) -> Result<Evaluation, EvaluatorError> {
        let raw = self.generate(self.build_prompt(title, description)).await?;
        parse_evaluation(&raw)
    }
}

/// Validate model output against the evaluation schema
///
/// Accepts a bare JSON object or one wrapped in a markdown code block.
/// Both fields must be present and typed, no others are allowed, and the
/// reasoning must not be blank.
pub fn parse_evaluation(raw: &str) -> Result<Evaluation, EvaluatorError> {
    let json = extract_json(raw);
    let evaluation: Evaluation =
        serde_json::from_str(json).map_err(|e| EvaluatorError::Schema(e.to_string()))?;

    if evaluation.reasoning.trim().is_empty() {
        return Err(EvaluatorError::Schema("reasoning is blank".into()));
    }
    Ok(evaluation)
}

/// Extract the JSON object from markdown code blocks or surrounding text
fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            return &text[start..=end];
        }
    }

    text.trim()
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Limiter shared by every classification worker in the process
pub type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a limiter allowing `per_minute` calls per rolling minute
pub fn per_minute_limiter(per_minute: u32) -> SharedLimiter {
    let rate = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(rate)))
}

/// [`Evaluator`] that waits for the shared limiter before each call
pub struct RateLimitedEvaluator {
    inner: Arc<dyn Evaluator>,
    limiter: SharedLimiter,
}

impl RateLimitedEvaluator {
    pub fn new(inner: Arc<dyn Evaluator>, limiter: SharedLimiter) -> Self {
        Self { inner, limiter }
    }

    pub fn limiter(&self) -> &SharedLimiter {
        &self.limiter
    }
}

#[async_trait]
impl Evaluator for RateLimitedEvaluator {
    async fn evaluate(&self, title: &str, description: &str) -> Result<Evaluation, EvaluatorError> {
        self.limiter.until_ready().await;
        self.inner.evaluate(title, description).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> EvaluatorConfig {
        EvaluatorConfig {
            endpoint: endpoint.to_string(),
            model: "test-model".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_evaluation() {
        let eval = parse_evaluation(r#"{"reasoning": "Junior role", "is_qualified": true}"#).unwrap();
        assert!(eval.is_qualified);
        assert_eq!(eval.reasoning, "Junior role");
    }

    #[test]
    fn test_parse_evaluation_code_block() {
        let raw = "Sure:\n```json\n{\"reasoning\": \"Needs 8 years\", \"is_qualified\": false}\n```";
        let eval = parse_evaluation(raw).unwrap();
        assert!(!eval.is_qualified);
    }

    #[test]
    fn test_parse_evaluation_rejects_schema_misses() {
        for raw in [
            r#"{"reasoning": "ok"}"#,
            r#"{"reasoning": "ok", "is_qualified": "yes"}"#,
            r#"{"reasoning": "  ", "is_qualified": true}"#,
            r#"{"reasoning": "ok", "is_qualified": true, "score": 9}"#,
            "no json here",
        ] {
            assert!(
                matches!(parse_evaluation(raw), Err(EvaluatorError::Schema(_))),
                "accepted {raw}"
            );
        }
    }

    #[test]
    fn test_prompt_contains_posting() {
        let evaluator = OllamaEvaluator::new(config("http://localhost:11434")).unwrap();
        let prompt = evaluator.build_prompt("Backend Engineer", "Rust and Postgres");
        assert!(prompt.contains("Title: Backend Engineer"));
        assert!(prompt.contains("Rust and Postgres"));
        assert!(prompt.contains("is_qualified"));
    }

    #[tokio::test]
    async fn test_ollama_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "format": "json",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "{\"reasoning\":\"Entry level\",\"is_qualified\":true}",
                "done": true
            })))
            .mount(&server)
            .await;

        let evaluator = OllamaEvaluator::new(config(&server.uri())).unwrap();
        let eval = evaluator.evaluate("SWE I", "0-2 years").await.unwrap();
        assert!(eval.is_qualified);
    }

    #[tokio::test]
    async fn test_ollama_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let evaluator = OllamaEvaluator::new(config(&server.uri())).unwrap();
        let err = evaluator.evaluate("SWE", "desc").await.unwrap_err();
        assert!(matches!(err, EvaluatorError::Status(503)));
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Evaluator for Counting {
        async fn evaluate(&self, _: &str, _: &str) -> Result<Evaluation, EvaluatorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Evaluation {
                reasoning: "ok".into(),
                is_qualified: true,
            })
        }
    }

    #[tokio::test]
    async fn test_limiter_shared_between_evaluators() {
        let limiter = per_minute_limiter(2);
        let inner = Arc::new(Counting(AtomicUsize::new(0)));
        let a = RateLimitedEvaluator::new(inner.clone(), Arc::clone(&limiter));
        let b = RateLimitedEvaluator::new(inner.clone(), Arc::clone(&limiter));

        a.evaluate("t", "d").await.unwrap();
        b.evaluate("t", "d").await.unwrap();

        assert_eq!(inner.0.load(Ordering::SeqCst), 2);
        // Quota spent by both wrappers together
        assert!(limiter.check().is_err());
    }
}
