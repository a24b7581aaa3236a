//! Worker pool draining the pending-work queue.
//!
//! Each worker runs as an independent async task: it pops an id, loads the
//! record, claims it, runs the execution engine and writes back the
//! outcome. A retried task goes back on the queue; every outcome is
//! announced through the notifier.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel
//! - Workers survive store failures with a fixed backoff
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::ExecutionEngine;
use crate::metrics::MetricsCollector;
use crate::notify::TaskEvent;
use crate::task::{Task, TaskStatus};

use super::queue::TaskQueue;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long one dequeue waits before the worker re-checks for shutdown.
    pub poll_interval: Duration,
    /// Pause after a store failure before the worker carries on.
    pub dequeue_backoff: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 3,
            poll_interval: Duration::from_secs(1),
            dequeue_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the backoff applied after store failures.
    pub fn with_dequeue_backoff(mut self, backoff: Duration) -> Self {
        self.dequeue_backoff = backoff;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// What one processing attempt did to its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Retrying,
    Failed,
}

impl Outcome {
    fn event(self) -> TaskEvent {
        match self {
            Outcome::Completed => TaskEvent::Completed,
            Outcome::Retrying => TaskEvent::Retrying,
            Outcome::Failed => TaskEvent::Failed,
        }
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing a task.
    pub active_workers: usize,
    /// Attempts that completed the task.
    pub tasks_completed: u64,
    /// Attempts that failed and were put back on the queue.
    pub tasks_retried: u64,
    /// Attempts that left the task failed.
    pub tasks_failed: u64,
    /// Average attempt duration.
    pub average_task_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of attempts processed.
    pub fn total_processed(&self) -> u64 {
        self.tasks_completed + self.tasks_retried + self.tasks_failed
    }

    /// Returns the share of attempts that succeeded, as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.tasks_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    tasks_completed: AtomicU64,
    tasks_retried: AtomicU64,
    tasks_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            tasks_completed: AtomicU64::new(0),
            tasks_retried: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record(&self, outcome: Outcome, duration: Duration) {
        let counter = match outcome {
            Outcome::Completed => &self.tasks_completed,
            Outcome::Retrying => &self.tasks_retried,
            Outcome::Failed => &self.tasks_failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.tasks_completed.load(Ordering::SeqCst);
        let retried = self.tasks_retried.load(Ordering::SeqCst);
        let failed = self.tasks_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total = completed + retried + failed;
        let average_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            tasks_completed: completed,
            tasks_retried: retried,
            tasks_failed: failed,
            average_task_duration: average_duration,
        }
    }
}

/// Worker pool that manages multiple workers processing tasks from a queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<TaskQueue>,
    engine: Arc<ExecutionEngine>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// # Arguments
    ///
    /// * `config` - Pool configuration
    /// * `queue` - Queue service whose store the workers drain
    /// * `engine` - Execution engine running task handlers
    pub fn new(config: WorkerPoolConfig, queue: Arc<TaskQueue>, engine: Arc<ExecutionEngine>) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            engine,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Returns a receiver that fires when the pool shuts down.
    ///
    /// Lets other long-running components, like the scheduler, stop on
    /// the same signal.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&self.queue),
                engine: Arc::clone(&self.engine),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                backoff: self.config.dequeue_backoff,
                stats: Arc::clone(&self.stats),
                metrics: MetricsCollector::new(),
            };

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Idle workers stop at their next poll; busy workers finish the
    /// current task first.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Returns the queue service.
    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }
}

/// A single worker that processes tasks from the queue.
pub struct Worker {
    id: String,
    queue: Arc<TaskQueue>,
    engine: Arc<ExecutionEngine>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    backoff: Duration,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    /// Main worker loop.
    ///
    /// Continuously pops ids and processes them until a shutdown signal is
    /// received. Store failures never end the loop.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");
        self.metrics.inc_active_workers();

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.store().dequeue_timeout(self.poll_interval).await {
                Ok(Some(id)) => self.process_id(id).await,
                Ok(None) => {
                    debug!(worker_id = %self.id, "No tasks available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue task");
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }

        self.metrics.dec_active_workers();
        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Loads and runs one dequeued task id.
    async fn process_id(&self, id: String) {
        let store = self.queue.store();

        let mut task = match store.get(&id).await {
            Ok(task) => task,
            Err(e) if e.is_not_found() => {
                warn!(worker_id = %self.id, task_id = %id, "Dequeued id has no task record, dropping");
                return;
            }
            Err(e) if e.is_transient() => {
                error!(worker_id = %self.id, task_id = %id, error = %e, "Failed to load task, requeueing");
                self.requeue_after_backoff(&id).await;
                return;
            }
            Err(e) => {
                error!(worker_id = %self.id, task_id = %id, error = %e, "Unreadable task record, dropping id");
                return;
            }
        };

        if task.status != TaskStatus::Pending {
            info!(
                worker_id = %self.id,
                task_id = %task.id,
                status = %task.status,
                "Skipping task that is not pending"
            );
            return;
        }

        if let Err(e) = task.claim(Utc::now()) {
            error!(worker_id = %self.id, task_id = %task.id, error = %e, "Failed to claim task");
            return;
        }
        if let Err(e) = store.put(&task).await {
            error!(worker_id = %self.id, task_id = %task.id, error = %e, "Failed to mark task processing");
            self.requeue_after_backoff(&id).await;
            return;
        }

        info!(
            worker_id = %self.id,
            task_id = %task.id,
            task_type = %task.task_type,
            attempt = task.retry_count + 1,
            "Processing task"
        );

        self.stats.increment_active();
        self.metrics.inc_in_progress();
        let start_time = Instant::now();

        let result = self.engine.execute(&task).await;
        let duration = start_time.elapsed();

        self.stats.decrement_active();
        self.metrics.dec_in_progress();

        let Some(outcome) = self.apply_outcome(&mut task, result) else {
            return;
        };

        // Nothing is announced until the outcome is durable.
        if !self.save_outcome(&task).await {
            return;
        }
        if outcome == Outcome::Retrying && !self.enqueue_until_accepted(&task.id).await {
            return;
        }

        let event = outcome.event();
        self.queue.notifier().task_processed(&task, event).await;

        self.stats.record(outcome, duration);
        self.metrics
            .record_processed(event.as_str(), &task.task_type, duration.as_secs_f64());
        self.queue.refresh_depth().await;
    }

    /// Applies an execution result to the claimed record.
    fn apply_outcome(
        &self,
        task: &mut Task,
        result: Result<(), crate::error::ExecutionError>,
    ) -> Option<Outcome> {
        let now = Utc::now();

        let applied = match result {
            Ok(()) => task.complete(now).map(|()| Outcome::Completed),
            Err(failure) => {
                let message = failure.to_string();
                task.record_failure(message.clone(), now).map(|retried| {
                    if retried {
                        warn!(
                            worker_id = %self.id,
                            task_id = %task.id,
                            error = %message,
                            retry_count = task.retry_count,
                            max_retries = task.max_retries,
                            "Task failed, requeueing for retry"
                        );
                        Outcome::Retrying
                    } else {
                        error!(
                            worker_id = %self.id,
                            task_id = %task.id,
                            error = %message,
                            "Task failed permanently"
                        );
                        Outcome::Failed
                    }
                })
            }
        };

        match applied {
            Ok(outcome) => {
                if outcome == Outcome::Completed {
                    info!(worker_id = %self.id, task_id = %task.id, "Task completed successfully");
                }
                Some(outcome)
            }
            Err(e) => {
                error!(worker_id = %self.id, task_id = %task.id, error = %e, "Failed to apply task outcome");
                None
            }
        }
    }

    /// Writes the outcome record, retrying transient store failures after
    /// the backoff. Returns `false` if the write was abandoned.
    async fn save_outcome(&self, task: &Task) -> bool {
        loop {
            match self.queue.store().put(task).await {
                Ok(()) => return true,
                Err(e) if e.is_transient() => {
                    warn!(
                        worker_id = %self.id,
                        task_id = %task.id,
                        status = %task.status,
                        error = %e,
                        "Failed to save task outcome, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    error!(
                        worker_id = %self.id,
                        task_id = %task.id,
                        status = %task.status,
                        error = %e,
                        "Failed to save task outcome"
                    );
                    return false;
                }
            }
        }
    }

    /// Pushes an id onto the queue, retrying transient store failures after
    /// the backoff. Returns `false` if the push was abandoned.
    async fn enqueue_until_accepted(&self, id: &str) -> bool {
        loop {
            match self.queue.store().enqueue(id).await {
                Ok(()) => return true,
                Err(e) if e.is_transient() => {
                    warn!(worker_id = %self.id, task_id = %id, error = %e, "Failed to requeue task, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    error!(worker_id = %self.id, task_id = %id, error = %e, "Failed to requeue task");
                    return false;
                }
            }
        }
    }

    async fn requeue_after_backoff(&self, id: &str) {
        tokio::time::sleep(self.backoff).await;
        self.enqueue_until_accepted(id).await;
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}
