//! Dispatch: the producer-facing queue service, the worker pool and the
//! scheduled-task promoter.
//!
//! - **TaskQueue**: create, read, retry and aggregate tasks
//! - **WorkerPool**: workers that drain the pending-work queue concurrently
//! - **Scheduler**: periodic promotion of due scheduled tasks
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐      ┌─────────────┐
//!                      │  TaskQueue   │      │  Scheduler  │
//!                      │   (CLI/API)  │      │   (tick)    │
//!                      └──────┬───────┘      └──────┬──────┘
//!                             │ put + enqueue        │ promote + enqueue
//!                      ┌──────▼──────────────────────▼──┐
//!                      │   TaskStore (hash + queue list) │
//!                      └──────┬─────────────────────────┘
//!                             │ dequeue
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskqueue::executor::{ExecutionEngine, HandlerDelays};
//! use taskqueue::scheduler::{Scheduler, TaskQueue, WorkerPool, WorkerPoolConfig};
//! use taskqueue::task::NewTask;
//!
//! let queue = Arc::new(TaskQueue::new(store.clone(), notifier, 3));
//! let engine = Arc::new(ExecutionEngine::new(HandlerDelays::default()));
//!
//! let mut pool = WorkerPool::new(WorkerPoolConfig::new(3), queue.clone(), engine);
//! let scheduler = Scheduler::new(store).spawn(pool.subscribe_shutdown());
//! pool.start()?;
//!
//! queue.create_task(NewTask::new("email", "user@example.com")).await?;
//!
//! pool.shutdown().await?;
//! scheduler.await?;
//! ```

pub mod promoter;
pub mod queue;
pub mod worker_pool;

pub use promoter::{Scheduler, DEFAULT_TICK};
pub use queue::TaskQueue;
pub use worker_pool::{PoolError, PoolStats, Worker, WorkerPool, WorkerPoolConfig};
