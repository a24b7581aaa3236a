//! Metrics module for Prometheus-based monitoring.
//!
//! # Example
//!
//! ```ignore
//! use taskqueue::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_processed("completed", "email", 2.1);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics};

pub use self::prometheus::{
    ACTIVE_WORKERS, QUEUE_DEPTH, REGISTRY, SCHEDULED_PROMOTIONS, TASKS_CREATED,
    TASKS_IN_PROGRESS, TASKS_PROCESSED, TASK_DURATION,
};
