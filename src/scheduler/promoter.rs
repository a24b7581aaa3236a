//! Periodic promotion of scheduled tasks.
//!
//! Every tick scans all records and moves `scheduled` tasks whose time has
//! come into `pending`, pushing their ids onto the queue. The scan is a full
//! listing; a due-time index would be the place to scale this.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::metrics::MetricsCollector;
use crate::store::SharedStore;
use crate::task::TaskStatus;

/// Default interval between scans.
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Promotes due scheduled tasks on a fixed interval.
pub struct Scheduler {
    store: SharedStore,
    tick: Duration,
    metrics: MetricsCollector,
}

impl Scheduler {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            tick: DEFAULT_TICK,
            metrics: MetricsCollector::new(),
        }
    }

    /// Sets the interval between scans.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Runs one scan, promoting every task due at `now`.
    ///
    /// Returns the number of tasks promoted. A task whose write fails is
    /// logged and left for the next scan.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let tasks = self.store.list().await?;
        let mut promoted = 0;

        for mut task in tasks
            .into_iter()
            .filter(|t| t.status == TaskStatus::Scheduled && t.is_due(now))
        {
            if let Err(e) = task.promote(now) {
                error!(task_id = %task.id, error = %e, "Failed to promote task");
                continue;
            }
            if let Err(e) = self.store.put(&task).await {
                error!(task_id = %task.id, error = %e, "Failed to save promoted task");
                continue;
            }
            if let Err(e) = self.store.enqueue(&task.id).await {
                error!(task_id = %task.id, error = %e, "Failed to enqueue promoted task");
                continue;
            }

            info!(task_id = %task.id, task_type = %task.task_type, "Scheduled task is due, queued");
            promoted += 1;
        }

        self.metrics.record_promotions(promoted);
        Ok(promoted)
    }

    /// Scans on every tick until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(tick_ms = self.tick.as_millis() as u64, "Scheduler started");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(0) => debug!("No scheduled tasks due"),
                        Ok(count) => debug!(count = count, "Promoted scheduled tasks"),
                        Err(e) => error!(error = %e, "Scheduler scan failed"),
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Spawns [`Scheduler::run`] onto the runtime.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
