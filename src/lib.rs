//! taskqueue: a durable task queue with a lifecycle engine.
//!
//! Producers create tasks through [`scheduler::TaskQueue`]; a
//! [`scheduler::WorkerPool`] drains the shared queue and runs each task
//! through the [`executor::ExecutionEngine`]; a [`scheduler::Scheduler`]
//! promotes scheduled tasks once they are due. Records and the queue live
//! in a [`store::TaskStore`] (Redis or in-memory).

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod mail;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod task;

// Re-export commonly used types
pub use config::{ConfigError, QueueConfig};
pub use error::{ExecutionError, NotifyError, StoreError, TaskError, ValidationError};
pub use scheduler::{Scheduler, TaskQueue, WorkerPool, WorkerPoolConfig};
pub use store::{InMemoryTaskStore, RedisTaskStore, SharedStore, TaskStore};
pub use task::{NewTask, QueueStats, Task, TaskStatus};
