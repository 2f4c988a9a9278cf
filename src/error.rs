//! Unified error handling for the jobscout crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while keeping the domain errors available
//! for callers that need the detail.
//!
//! # Architecture
//!
//! - [`JobscoutErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors

use std::io;
use thiserror::Error;

pub use crate::models::DecodeError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::utils::error::{
    DedupError, EvaluatorError, ExtractError, FetchError, SinkError, TransportError,
};

/// Common trait for jobscout error types
pub trait JobscoutErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, dedup store, sources)
    Network,
    /// Intake transport connectivity
    Transport,
    /// Decoding and validation of inbound data
    Decode,
    /// Evaluator (LLM) errors
    Evaluator,
    /// Notification and persistence sink errors
    Sink,
    /// Configuration and validation errors
    Config,
    /// Scheduler errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short stable name, used as a metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::Evaluator => "evaluator",
            Self::Sink => "sink",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the jobscout crate
#[derive(Error, Debug)]
pub enum Error {
    /// Source fetch errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Extraction errors
    #[error("Extract error: {0}")]
    Extract(#[from] ExtractError),

    /// Dedup store errors
    #[error("Dedup error: {0}")]
    Dedup(#[from] DedupError),

    /// Inbound message decode errors
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Evaluator errors
    #[error("Evaluator error: {0}")]
    Evaluator(#[from] EvaluatorError),

    /// Sink errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl JobscoutErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => !matches!(e, FetchError::InvalidUrl(_) | FetchError::ClientError(_)),
            Self::Extract(e) => matches!(e, ExtractError::Fetch(_) | ExtractError::NoListings(_)),
            Self::Dedup(e) => !matches!(e, DedupError::InvalidUrl(_)),
            Self::Decode(_) => false,
            Self::Transport(e) => !matches!(e, TransportError::Closed),
            Self::Evaluator(_) => true, // Retried by requeue, including schema misses
            Self::Sink(e) => !matches!(
                e,
                SinkError::Serialization(_)
                    | SinkError::MissingEvaluation(_)
                    | SinkError::InvalidConfig(_)
            ),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) | Self::Extract(_) | Self::Dedup(_) => ErrorCategory::Network,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Evaluator(_) => ErrorCategory::Evaluator,
            Self::Sink(_) => ErrorCategory::Sink,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Decode(_) | Self::Json(_) => ErrorCategory::Decode,
            Self::Config(_) => ErrorCategory::Config,
            Self::Io(_) | Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
