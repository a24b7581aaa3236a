//! Task records and the derived queue statistics.
//!
//! - `Task`: the unit of work and its latest execution record
//! - `TaskStatus`: lifecycle status of a task
//! - `NewTask`: a creation request, normalised into a `Task` by the producer path
//! - `QueueStats`: read-time aggregate over the task population

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Priority assigned when the request omits one or gives one outside 1..=5.
pub const DEFAULT_PRIORITY: i32 = 3;

/// Retry budget assigned when the request does not specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

const MIN_PRIORITY: i32 = 1;
const MAX_PRIORITY: i32 = 5;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for its `scheduled_for` time.
    Scheduled,
    /// Queued, waiting for a worker.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Handler succeeded.
    Completed,
    /// Handler failed; terminal once no retries remain.
    Failed,
}

impl TaskStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of declared work and its execution record.
///
/// This is the JSON value stored in the task hash and returned to producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, assigned at creation.
    pub id: String,
    /// Handler selector ("email", "image", "webhook", ...).
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque handler input.
    pub payload: String,
    pub status: TaskStatus,
    /// 1 = low, 5 = high. Stored but not used for ordering.
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last execution failure message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Task {
    /// Returns whether the task is scheduled for a time after `now`.
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.is_some_and(|at| at > now)
    }

    /// Returns whether the task is waiting on a schedule that has come due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Scheduled && self.scheduled_for.is_some_and(|at| at <= now)
    }

    /// Returns whether the task has reached a state no worker will move it out of.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            TaskStatus::Completed => true,
            TaskStatus::Failed => !crate::task::can_retry(self),
            _ => false,
        }
    }
}

/// A request to create a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub webhook: Option<String>,
    /// `None` means "use the default"; an explicit `Some(0)` disables retries.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl NewTask {
    /// Creates a request for an immediately runnable task.
    pub fn new(task_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// Sets the advisory priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Defers the task until `at`.
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Sets the URL notified when the task completes.
    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook = Some(url.into());
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Validates the request and builds the initial task record.
    ///
    /// The initial status is `scheduled` when `scheduled_for` lies after
    /// `now`, otherwise `pending`.
    pub fn into_task(self, now: DateTime<Utc>) -> Result<Task, ValidationError> {
        if self.task_type.trim().is_empty() {
            return Err(ValidationError::MissingField("type"));
        }
        if self.payload.is_empty() {
            return Err(ValidationError::MissingField("payload"));
        }

        let priority = match self.priority {
            Some(p) if (MIN_PRIORITY..=MAX_PRIORITY).contains(&p) => p,
            _ => DEFAULT_PRIORITY,
        };

        let status = if self.scheduled_for.is_some_and(|at| at > now) {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Pending
        };

        Ok(Task {
            id: Uuid::new_v4().to_string(),
            task_type: self.task_type,
            payload: self.payload,
            status,
            priority,
            scheduled_for: self.scheduled_for,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            webhook: self.webhook.filter(|url| !url.trim().is_empty()),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: String::new(),
        })
    }
}

/// Read-time statistics about the queue and the task population.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_tasks: usize,
    /// Depth of the pending-work queue, not the count of `pending` records.
    pub pending_count: usize,
    pub processing_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    /// Tasks still waiting on a future `scheduled_for`.
    pub scheduled_count: usize,
    pub worker_count: usize,
}

impl QueueStats {
    /// Aggregates statistics over a task population.
    pub fn from_tasks(
        tasks: &[Task],
        queue_depth: usize,
        worker_count: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = QueueStats {
            total_tasks: tasks.len(),
            pending_count: queue_depth,
            worker_count,
            ..Default::default()
        };

        for task in tasks {
            match task.status {
                TaskStatus::Processing => stats.processing_count += 1,
                TaskStatus::Completed => stats.completed_count += 1,
                TaskStatus::Failed => stats.failed_count += 1,
                TaskStatus::Scheduled if task.is_deferred(now) => stats.scheduled_count += 1,
                TaskStatus::Scheduled | TaskStatus::Pending => {}
            }
        }

        stats
    }
}
