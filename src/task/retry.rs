//! Retry policy.
//!
//! A single predicate shared by the worker's post-execution path and the
//! explicit retry request, so both decide retriability the same way.

use super::model::{Task, TaskStatus};

/// Returns whether a task is eligible for re-execution.
///
/// Only failed tasks that have not exhausted their retry budget qualify.
pub fn can_retry(task: &Task) -> bool {
    task.status == TaskStatus::Failed && task.retry_count < task.max_retries
}

/// Returns the number of retries a task has left.
pub fn remaining_retries(task: &Task) -> u32 {
    task.max_retries.saturating_sub(task.retry_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;
    use chrono::Utc;

    fn task_with(status: TaskStatus, retry_count: u32, max_retries: u32) -> Task {
        let mut task = NewTask::new("email", "u@x.com")
            .with_max_retries(max_retries)
            .into_task(Utc::now())
            .unwrap();
        task.status = status;
        task.retry_count = retry_count;
        task
    }

    #[test]
    fn test_failed_with_budget_is_retriable() {
        assert!(can_retry(&task_with(TaskStatus::Failed, 0, 2)));
        assert!(can_retry(&task_with(TaskStatus::Failed, 1, 2)));
    }

    #[test]
    fn test_exhausted_budget_is_not_retriable() {
        assert!(!can_retry(&task_with(TaskStatus::Failed, 2, 2)));
        assert!(!can_retry(&task_with(TaskStatus::Failed, 0, 0)));
    }

    #[test]
    fn test_non_failed_status_is_not_retriable() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Scheduled,
            TaskStatus::Processing,
            TaskStatus::Completed,
        ] {
            assert!(!can_retry(&task_with(status, 0, 5)), "{status}");
        }
    }

    #[test]
    fn test_remaining_retries() {
        assert_eq!(remaining_retries(&task_with(TaskStatus::Failed, 0, 2)), 2);
        assert_eq!(remaining_retries(&task_with(TaskStatus::Failed, 2, 2)), 0);
    }
}
