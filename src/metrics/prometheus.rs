//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by taskqueue and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all taskqueue metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Tasks accepted by the producer path, labeled by type.
pub static TASKS_CREATED: OnceLock<CounterVec> = OnceLock::new();

/// Processing attempts, labeled by outcome and type.
pub static TASKS_PROCESSED: OnceLock<CounterVec> = OnceLock::new();

/// Processing attempt duration in seconds, labeled by type.
pub static TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of ids waiting in the queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of tasks currently being processed.
pub static TASKS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of running workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Scheduled tasks promoted into the queue.
pub static SCHEDULED_PROMOTIONS: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Recording before initialization is a no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let tasks_created = CounterVec::new(
        Opts::new("taskqueue_tasks_created_total", "Total number of tasks created"),
        &["type"],
    )?;

    let tasks_processed = CounterVec::new(
        Opts::new(
            "taskqueue_tasks_processed_total",
            "Total number of processing attempts",
        ),
        &["outcome", "type"],
    )?;

    let task_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "taskqueue_task_duration_seconds",
            "Processing attempt duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0, 30.0]),
        &["type"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("taskqueue_queue_depth", "Number of task ids in queue"),
        &["queue_name"],
    )?;

    let tasks_in_progress = Gauge::new(
        "taskqueue_tasks_in_progress",
        "Number of tasks currently being processed",
    )?;

    let active_workers = Gauge::new("taskqueue_active_workers", "Number of running workers")?;

    let scheduled_promotions = Counter::new(
        "taskqueue_scheduled_promotions_total",
        "Scheduled tasks moved into the queue",
    )?;

    registry.register(Box::new(tasks_created.clone()))?;
    registry.register(Box::new(tasks_processed.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(tasks_in_progress.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(scheduled_promotions.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = TASKS_CREATED.set(tasks_created);
    let _ = TASKS_PROCESSED.set(tasks_processed);
    let _ = TASK_DURATION.set(task_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = TASKS_IN_PROGRESS.set(tasks_in_progress);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = SCHEDULED_PROMOTIONS.set(scheduled_promotions);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
