//! Task store: records, the pending-work queue and the event channel.
//!
//! The lifecycle engine only talks to the [`TaskStore`] trait. Two
//! backends are provided:
//!
//! - [`RedisTaskStore`]: records in a hash, ids in a list (LPUSH/BRPOP),
//!   events over PUBLISH
//! - [`InMemoryTaskStore`]: same semantics inside the process, for tests
//!   and local runs
//!
//! # Consistency
//!
//! `put` and `enqueue` are separate calls and updates are whole-record
//! read-modify-write with last-write-wins semantics. Two writers racing on
//! the same task can lose an update.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::task::Task;

pub use self::memory::InMemoryTaskStore;
pub use self::redis::{RedisKeys, RedisTaskStore};

/// Wait per round of the default `dequeue_blocking` loop.
const BLOCKING_ROUND: Duration = Duration::from_secs(5);

/// Storage backend consumed by the lifecycle engine.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Writes the full task record, replacing any previous version.
    async fn put(&self, task: &Task) -> Result<(), StoreError>;

    /// Fetches a task record by id.
    async fn get(&self, id: &str) -> Result<Task, StoreError>;

    /// Returns every stored task record, in no particular order.
    async fn list(&self) -> Result<Vec<Task>, StoreError>;

    /// Returns the number of stored task records.
    async fn count(&self) -> Result<usize, StoreError>;

    /// Appends a task id to the pending-work queue.
    async fn enqueue(&self, id: &str) -> Result<(), StoreError>;

    /// Removes the oldest id from the queue, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Any given id is
    /// handed to at most one caller.
    async fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<String>, StoreError>;

    /// Removes the oldest id from the queue, waiting until one is available.
    async fn dequeue_blocking(&self) -> Result<String, StoreError> {
        loop {
            if let Some(id) = self.dequeue_timeout(BLOCKING_ROUND).await? {
                return Ok(id);
            }
        }
    }

    /// Returns the number of ids waiting in the queue.
    async fn queue_depth(&self) -> Result<usize, StoreError>;

    /// Publishes a message on a notification topic.
    async fn publish(&self, topic: &str, message: &str) -> Result<(), StoreError>;
}

/// Store handle shared by the producer path, workers and scheduler.
pub type SharedStore = Arc<dyn TaskStore>;
