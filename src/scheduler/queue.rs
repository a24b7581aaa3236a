//! Producer-side task operations.
//!
//! `TaskQueue` wraps the shared store with the operations clients use:
//! creating tasks, reading them back, explicit retries and statistics.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::TaskError;
use crate::metrics::MetricsCollector;
use crate::notify::Notifier;
use crate::store::SharedStore;
use crate::task::{NewTask, QueueStats, Task, TaskStatus};

/// The task queue service shared by the CLI, workers and scheduler.
#[derive(Clone)]
pub struct TaskQueue {
    store: SharedStore,
    notifier: Notifier,
    worker_count: usize,
    metrics: MetricsCollector,
    queue_name: String,
}

impl TaskQueue {
    /// Creates a queue service over a store.
    ///
    /// `worker_count` is only reported in statistics.
    pub fn new(store: SharedStore, notifier: Notifier, worker_count: usize) -> Self {
        Self {
            store,
            notifier,
            worker_count,
            metrics: MetricsCollector::new(),
            queue_name: "task_queue".to_string(),
        }
    }

    /// Sets the queue name used as the depth gauge label.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Validates and persists a new task.
    ///
    /// Immediate tasks are enqueued right away; tasks scheduled in the future
    /// wait for the scheduler to promote them.
    pub async fn create_task(&self, request: NewTask) -> Result<Task, TaskError> {
        let task = request.into_task(Utc::now())?;

        self.store.put(&task).await?;
        // Announced before enqueueing so it precedes any outcome event.
        self.notifier.task_created(&task).await;
        if task.status == TaskStatus::Pending {
            self.store.enqueue(&task.id).await?;
        }

        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            status = %task.status,
            priority = task.priority,
            "Task created"
        );

        self.metrics.record_created(&task.task_type);
        self.refresh_depth().await;

        Ok(task)
    }

    /// Fetches a task by id.
    pub async fn get_task(&self, id: &str) -> Result<Task, TaskError> {
        Ok(self.store.get(id).await?)
    }

    /// Returns every stored task, in no particular order.
    pub async fn list_tasks(&self) -> Result<Vec<Task>, TaskError> {
        Ok(self.store.list().await?)
    }

    /// Puts a failed task back on the queue if it has retries left.
    ///
    /// When the retry policy refuses, the stored record is returned
    /// unchanged and nothing is written.
    pub async fn retry_task(&self, id: &str) -> Result<Task, TaskError> {
        let mut task = self.store.get(id).await?;

        if !task.retry(Utc::now())? {
            debug!(
                task_id = %task.id,
                status = %task.status,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                "Retry refused"
            );
            return Ok(task);
        }

        self.store.put(&task).await?;
        self.store.enqueue(&task.id).await?;

        info!(
            task_id = %task.id,
            retry_count = task.retry_count,
            "Task requeued for retry"
        );
        self.refresh_depth().await;

        Ok(task)
    }

    /// Aggregates statistics over every stored task.
    pub async fn stats(&self) -> Result<QueueStats, TaskError> {
        let tasks = self.store.list().await?;
        let depth = self.store.queue_depth().await?;
        Ok(QueueStats::from_tasks(
            &tasks,
            depth,
            self.worker_count,
            Utc::now(),
        ))
    }

    /// Updates the queue depth gauge. Failures only skip the update.
    pub async fn refresh_depth(&self) {
        match self.store.queue_depth().await {
            Ok(depth) => self.metrics.update_queue_depth(&self.queue_name, depth),
            Err(e) => warn!(error = %e, "Failed to read queue depth"),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Returns the notifier.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Returns the configured worker count.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}
