//! Task data model, state machine and retry policy.

pub mod lifecycle;
pub mod model;
pub mod retry;

pub use lifecycle::can_transition;
pub use model::{NewTask, QueueStats, Task, TaskStatus, DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY};
pub use retry::{can_retry, remaining_retries};
