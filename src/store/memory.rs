//! In-process task store.
//!
//! Mirrors the Redis layout with a map of records, a FIFO deque of ids and
//! a log of published events. Blocking dequeue parks on a `Notify` until an
//! id is pushed; the id is removed under the queue lock so only one waiter
//! can take it.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::TaskStore;
use crate::error::StoreError;
use crate::task::Task;

/// Task store held entirely in memory.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, Task>>,
    queue: Mutex<VecDeque<String>>,
    available: Notify,
    events: Mutex<Vec<(String, String)>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every `(topic, message)` published so far, oldest first.
    pub async fn published(&self) -> Vec<(String, String)> {
        self.events.lock().await.clone()
    }

    /// Returns the ids currently queued, next-to-be-dequeued first.
    pub async fn queued_ids(&self) -> Vec<String> {
        self.queue.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks
            .lock()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Task, StoreError> {
        self.tasks
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.tasks.lock().await.values().cloned().collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.tasks.lock().await.len())
    }

    async fn enqueue(&self, id: &str) -> Result<(), StoreError> {
        self.queue.lock().await.push_back(id.to_string());
        self.available.notify_one();
        Ok(())
    }

    async fn dequeue_blocking(&self) -> Result<String, StoreError> {
        loop {
            // Register interest before checking the queue so a push between
            // the check and the await is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(id) = self.queue.lock().await.pop_front() {
                return Ok(id);
            }

            notified.await;
        }
    }

    async fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<String>, StoreError> {
        match tokio::time::timeout(timeout, self.dequeue_blocking()).await {
            Ok(id) => id.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn queue_depth(&self) -> Result<usize, StoreError> {
        Ok(self.queue.lock().await.len())
    }

    async fn publish(&self, topic: &str, message: &str) -> Result<(), StoreError> {
        self.events
            .lock()
            .await
            .push((topic.to_string(), message.to_string()));
        Ok(())
    }
}
