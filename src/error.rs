//! Error types for taskqueue operations.
//!
//! Defines the error taxonomy used across the lifecycle engine:
//! - Task creation request validation
//! - Task store access (missing records, transient backend failures)
//! - Handler execution failures
//! - Best-effort notification failures
//! - Producer-path operations that combine the above

use thiserror::Error;

/// Errors raised when a task creation request is malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid scheduled_for timestamp '{0}': expected RFC3339")]
    InvalidTimestamp(String),
}

/// Errors that can occur while talking to the task store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("Task store unavailable: {0}")]
    Unavailable(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Task record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns whether the failure is a backend hiccup worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Redis(_))
    }

    /// Returns whether the failure means the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Failure reported by a task handler.
///
/// Always captured as a value by the execution engine; drives the
/// retry/failed transition and ends up in `task.error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("{0}")]
    Handler(String),

    #[error("Email delivery failed: {0}")]
    Mail(String),

    #[error("No handler registered for task type '{0}'")]
    UnknownType(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Failure of a best-effort notification channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Event publish failed: {0}")]
    Publish(#[from] StoreError),

    #[error("Webhook request to '{url}' failed: {reason}")]
    Webhook { url: String, reason: String },

    #[error("Notification channel closed")]
    ChannelClosed,
}

/// Errors returned by producer-path operations on the task queue.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid task request: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid state transition from '{from}' to '{to}' for task {task_id}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },
}

impl TaskError {
    /// Returns whether this error means the task id is unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::Store(e) if e.is_not_found())
    }
}
