//! Task state machine.
//!
//! Valid transitions:
//! - Scheduled -> Pending (scheduler promotion)
//! - Pending -> Processing (worker claim)
//! - Processing -> Completed (handler succeeded)
//! - Processing -> Failed (handler failed, no retries left)
//! - Processing -> Pending (handler failed, retried)
//! - Failed -> Pending (explicit retry)
//!
//! Every mutation goes through one of the methods below, which refuse a
//! transition outside this table and leave the record untouched.

use chrono::{DateTime, Utc};

use super::model::{Task, TaskStatus};
use super::retry::can_retry;
use crate::error::TaskError;

/// Check if a transition between two statuses is allowed.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Scheduled, Pending)
            | (Pending, Processing)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Pending)
            | (Failed, Pending)
    )
}

impl Task {
    fn transition(&mut self, to: TaskStatus, now: DateTime<Utc>) -> Result<(), TaskError> {
        if !can_transition(self.status, to) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Moves a due scheduled task into the pending state.
    pub fn promote(&mut self, now: DateTime<Utc>) -> Result<(), TaskError> {
        if self.status != TaskStatus::Scheduled || !self.is_due(now) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status.to_string(),
                to: TaskStatus::Pending.to_string(),
            });
        }
        self.transition(TaskStatus::Pending, now)
    }

    /// Marks a pending task as claimed by a worker.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Processing, now)
    }

    /// Records a successful execution.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Completed, now)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Records a failed execution.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed, now)?;
        self.error = error.into();
        Ok(())
    }

    /// Puts a failed task back into the pending state, consuming one retry.
    ///
    /// Returns `Ok(false)` without touching the record when the retry
    /// policy refuses.
    pub fn retry(&mut self, now: DateTime<Utc>) -> Result<bool, TaskError> {
        if !can_retry(self) {
            return Ok(false);
        }
        self.transition(TaskStatus::Pending, now)?;
        self.retry_count += 1;
        self.error.clear();
        Ok(true)
    }

    /// Applies a handler failure: retry when the policy allows, otherwise
    /// finalize as failed.
    ///
    /// Returns `true` if the task was put back to pending.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, TaskError> {
        if self.status != TaskStatus::Processing {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status.to_string(),
                to: TaskStatus::Failed.to_string(),
            });
        }

        // Evaluate the policy against the failed state without committing
        // to it, so a retried record goes Processing -> Pending directly.
        let mut failed = self.clone();
        failed.status = TaskStatus::Failed;
        if can_retry(&failed) {
            self.transition(TaskStatus::Pending, now)?;
            self.retry_count += 1;
            self.error.clear();
            Ok(true)
        } else {
            self.fail(error, now)?;
            Ok(false)
        }
    }
}
