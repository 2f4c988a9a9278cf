//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Interval lower bound above upper bound
    InvalidInterval { min_secs: u64, max_secs: u64 },

    /// Concurrency cap of zero
    InvalidConcurrency { value: usize },

    /// A task body panicked
    TaskPanicked { task: String, reason: String },

    /// The permit pool was closed underneath the scheduler
    PermitsClosed,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval { min_secs, max_secs } => {
                write!(
                    f,
                    "Invalid interval range ({}s, {}s): min must not exceed max",
                    min_secs, max_secs
                )
            }
            Self::InvalidConcurrency { value } => {
                write!(f, "Invalid concurrency cap '{}'. Must be at least 1", value)
            }
            Self::TaskPanicked { task, reason } => {
                write!(f, "Task '{}' panicked: {}", task, reason)
            }
            Self::PermitsClosed => write!(f, "Scheduler permit pool closed"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid interval error
    pub fn invalid_interval(min_secs: u64, max_secs: u64) -> Self {
        Self::InvalidInterval { min_secs, max_secs }
    }

    /// Create a task panicked error
    pub fn task_panicked(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskPanicked {
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TaskPanicked { .. })
    }
}
