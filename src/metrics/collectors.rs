//! High-level recording interface over the raw Prometheus metrics.

use super::prometheus::{
    ACTIVE_WORKERS, QUEUE_DEPTH, SCHEDULED_PROMOTIONS, TASKS_CREATED, TASKS_IN_PROGRESS,
    TASKS_PROCESSED, TASK_DURATION,
};

/// Metrics collector for recording queue operational metrics.
///
/// Every method is a no-op until `init_metrics()` has run, so library code
/// can record unconditionally.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a task accepted by the producer path.
    pub fn record_created(&self, task_type: &str) {
        if let Some(tasks_created) = TASKS_CREATED.get() {
            tasks_created.with_label_values(&[task_type]).inc();
        }
    }

    /// Record one processing attempt.
    ///
    /// # Arguments
    ///
    /// * `outcome` - "completed", "retrying" or "failed"
    /// * `task_type` - Task type tag
    /// * `duration_secs` - Time spent in the execution engine
    pub fn record_processed(&self, outcome: &str, task_type: &str, duration_secs: f64) {
        if let Some(tasks_processed) = TASKS_PROCESSED.get() {
            tasks_processed
                .with_label_values(&[outcome, task_type])
                .inc();
        }

        if let Some(task_duration) = TASK_DURATION.get() {
            task_duration
                .with_label_values(&[task_type])
                .observe(duration_secs);
        }

        tracing::trace!(
            outcome = outcome,
            task_type = task_type,
            duration_secs = duration_secs,
            "Recorded task metric"
        );
    }

    /// Update the queue depth for a specific queue.
    pub fn update_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue_name])
                .set(depth as f64);
        }
    }

    pub fn inc_active_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.inc();
        }
    }

    pub fn dec_active_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.dec();
        }
    }

    pub fn inc_in_progress(&self) {
        if let Some(in_progress) = TASKS_IN_PROGRESS.get() {
            in_progress.inc();
        }
    }

    pub fn dec_in_progress(&self) {
        if let Some(in_progress) = TASKS_IN_PROGRESS.get() {
            in_progress.dec();
        }
    }

    /// Record scheduled tasks promoted in one scheduler tick.
    pub fn record_promotions(&self, count: usize) {
        if let Some(promotions) = SCHEDULED_PROMOTIONS.get() {
            promotions.inc_by(count as f64);
        }
    }
}
