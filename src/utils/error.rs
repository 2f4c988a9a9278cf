//! Error types for the jobscout collaborators
//!
//! This module defines the error types raised by the external collaborators
//! (sources, dedup store, transport, evaluator, sinks).

use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Client error with status code
    #[error("Client error: {0}")]
    ClientError(u16),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors raised while extracting postings from a source page
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Page could not be fetched
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// A configured CSS selector does not parse
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// The listing page had no job elements at all
    #[error("No job elements found for source {0}")]
    NoListings(String),

    /// A listing element had no usable id
    #[error("Listing id not found")]
    IdNotFound,

    /// Every description field on the detail page was empty
    #[error("Description not found for {0}")]
    DescriptionNotFound(String),
}

/// Errors from the dedup store service
#[derive(Error, Debug)]
pub enum DedupError {
    /// HTTP transport failure talking to the store
    #[error("Dedup store request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with an unexpected status
    #[error("Dedup store rejected {operation} with status {status}")]
    Rejected { operation: &'static str, status: u16 },

    /// Base URL is malformed
    #[error("Invalid dedup store URL: {0}")]
    InvalidUrl(String),
}

/// Errors from the intake transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not establish a connection
    #[error("Transport connection failed: {0}")]
    Connect(String),

    /// The live connection dropped or a command failed
    #[error("Transport command '{command}' failed: {reason}")]
    Command { command: &'static str, reason: String },

    /// No response within the watchdog window
    #[error("Transport timed out after {0}s")]
    Timeout(u64),

    /// The transport was closed locally
    #[error("Transport closed")]
    Closed,
}

impl From<redis::RedisError> for TransportError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            Self::Connect(err.to_string())
        } else {
            Self::Command {
                command: "redis",
                reason: err.to_string(),
            }
        }
    }
}

/// Errors from the posting evaluator
#[derive(Error, Debug)]
pub enum EvaluatorError {
    /// HTTP transport failure
    #[error("Evaluator request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the model server
    #[error("Evaluator returned status {0}")]
    Status(u16),

    /// The model produced nothing
    #[error("Evaluator returned an empty response")]
    EmptyResponse,

    /// The model output did not match the evaluation schema
    #[error("Evaluation failed schema validation: {0}")]
    Schema(String),
}

/// Errors from notification and persistence sinks
#[derive(Error, Debug)]
pub enum SinkError {
    /// HTTP transport failure
    #[error("Sink HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from a webhook endpoint
    #[error("Sink returned status {0}")]
    Status(u16),

    /// Redis publish failure
    #[error("Redis publish failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// PostgreSQL failure
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Connection pool failure
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Posting could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A posting without an evaluation reached a sink
    #[error("Posting {0} has no evaluation")]
    MissingEvaluation(String),

    /// Sink misconfigured
    #[error("Invalid sink configuration: {0}")]
    InvalidConfig(String),
}

impl From<deadpool_postgres::PoolError> for SinkError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
