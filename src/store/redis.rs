//! Redis-backed task store.
//!
//! # Layout
//!
//! - `{tasks}`: hash of task id -> JSON task record
//! - `{queue}`: list of pending task ids, LPUSH to enqueue, BRPOP to dequeue
//! - events are sent with PUBLISH on the topic given by the caller
//!
//! Record reads and writes share one `ConnectionManager` (reconnects
//! automatically). Blocking pops run on dedicated connections checked out
//! of a small pool, since a parked BRPOP would otherwise hold up every
//! command multiplexed behind it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::TaskStore;
use crate::error::StoreError;
use crate::task::Task;

/// How long a single BRPOP waits before the dequeue loop re-issues it.
const DEFAULT_POP_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis key names used by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    /// Hash holding task records.
    pub tasks: String,
    /// List holding pending task ids.
    pub queue: String,
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self {
            tasks: "tasks".to_string(),
            queue: "task_queue".to_string(),
        }
    }
}

/// Task store backed by a Redis server.
pub struct RedisTaskStore {
    client: redis::Client,
    redis: ConnectionManager,
    blocking: Mutex<Vec<MultiplexedConnection>>,
    keys: RedisKeys,
    pop_timeout: Duration,
}

impl RedisTaskStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `keys` - Key names for the record hash and the queue list
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the connection fails.
    pub async fn connect(redis_url: &str, keys: RedisKeys) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            redis,
            blocking: Mutex::new(Vec::new()),
            keys,
            pop_timeout: DEFAULT_POP_TIMEOUT,
        })
    }

    /// Sets how long each BRPOP round waits before being re-issued.
    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// Returns the key names in use.
    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    async fn checkout(&self) -> Result<MultiplexedConnection, StoreError> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    async fn checkin(&self, conn: MultiplexedConnection) {
        self.blocking.lock().await.push(conn);
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn put(&self, task: &Task) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(task)?;
        let mut conn = self.redis.clone();
        conn.hset::<_, _, _, ()>(&self.keys.tasks, &task.id, serialized)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Task, StoreError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.hget(&self.keys.tasks, id).await?;

        match data {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let mut conn = self.redis.clone();
        let records: HashMap<String, String> = conn.hgetall(&self.keys.tasks).await?;

        let mut tasks = Vec::with_capacity(records.len());
        for (id, data) in records {
            match serde_json::from_str::<Task>(&data) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(task_id = %id, error = %e, "Skipping unreadable task record"),
            }
        }
        Ok(tasks)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.hlen(&self.keys.tasks).await?;
        Ok(len)
    }

    async fn enqueue(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.keys.queue, id).await?;
        Ok(())
    }

    async fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<String>, StoreError> {
        // BRPOP treats 0 as "wait forever".
        let timeout_secs = timeout.as_secs_f64().max(0.01);
        let mut conn = self.checkout().await?;

        // BRPOP removes the element atomically, so concurrent poppers
        // never receive the same id. A failed connection is dropped.
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.keys.queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        self.checkin(conn).await;
        Ok(popped.map(|(_, id)| id))
    }

    async fn dequeue_blocking(&self) -> Result<String, StoreError> {
        loop {
            match self.dequeue_timeout(self.pop_timeout).await? {
                Some(id) => return Ok(id),
                None => debug!(queue = %self.keys.queue, "BRPOP timed out, waiting again"),
            }
        }
    }

    async fn queue_depth(&self) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.keys.queue).await?;
        Ok(len)
    }

    async fn publish(&self, topic: &str, message: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.publish::<_, _, ()>(topic, message).await?;
        Ok(())
    }
}
