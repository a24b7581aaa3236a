//! End-to-end lifecycle tests against the in-memory store.
//!
//! Handlers are scripted and delays are zero or a few milliseconds, so the
//! whole suite runs in well under a second per test.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use taskqueue::error::{ExecutionError, NotifyError, StoreError};
use taskqueue::executor::{ExecutionEngine, HandlerDelays, TaskHandler};
use taskqueue::notify::{EventPublisher, Notifier, WebhookClient, WebhookDispatcher};
use taskqueue::scheduler::{Scheduler, TaskQueue, WorkerPool, WorkerPoolConfig};
use taskqueue::store::{InMemoryTaskStore, SharedStore, TaskStore};
use taskqueue::task::{can_transition, NewTask, Task, TaskStatus};

// ============================================================================
// Test doubles
// ============================================================================

/// Fails the first `failures` calls, then succeeds.
struct FlakyHandler {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyHandler {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, _task: &Task) -> Result<(), ExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(ExecutionError::Mail(format!("smtp timeout #{}", call + 1)))
        } else {
            Ok(())
        }
    }
}

struct PanickingHandler;

#[async_trait]
impl TaskHandler for PanickingHandler {
    async fn handle(&self, _task: &Task) -> Result<(), ExecutionError> {
        panic!("image decoder crashed");
    }
}

#[derive(Default)]
struct RecordingWebhookClient {
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl WebhookClient for RecordingWebhookClient {
    async fn post(&self, url: &str, body: &str) -> Result<(), NotifyError> {
        self.calls
            .lock()
            .await
            .push((url.to_string(), body.to_string()));
        Ok(())
    }
}

/// Wraps the in-memory store, records every write and every announcement,
/// and can inject failures or stall a read.
struct RecordingStore {
    inner: InMemoryTaskStore,
    writes: Mutex<Vec<Task>>,
    announced: Mutex<Vec<(String, TaskStatus)>>,
    dequeue_failures: AtomicUsize,
    put_failures: Mutex<Option<(TaskStatus, usize)>>,
    requeue_failures: AtomicUsize,
    held_get: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryTaskStore::new(),
            writes: Mutex::new(Vec::new()),
            announced: Mutex::new(Vec::new()),
            dequeue_failures: AtomicUsize::new(0),
            put_failures: Mutex::new(None),
            requeue_failures: AtomicUsize::new(0),
            held_get: Mutex::new(None),
        }
    }

    fn fail_next_dequeues(&self, count: usize) {
        self.dequeue_failures.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` writes of records in `status`.
    async fn fail_next_puts_of(&self, status: TaskStatus, count: usize) {
        *self.put_failures.lock().await = Some((status, count));
    }

    /// Fails the next `count` enqueues of tasks that have been retried.
    fn fail_next_requeues(&self, count: usize) {
        self.requeue_failures.store(count, Ordering::SeqCst);
    }

    /// Stalls the next `get` after it has read the record. Returns a signal
    /// fired once the read happened and the handle that lets it return.
    async fn hold_next_get(&self) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.held_get.lock().await = Some((reached.clone(), release.clone()));
        (reached, release)
    }

    async fn events(&self) -> Vec<String> {
        self.inner
            .published()
            .await
            .into_iter()
            .map(|(_, message)| message)
            .collect()
    }

    /// Stored status of the task at the moment `message` was published.
    async fn status_when_announced(&self, message: &str) -> Option<TaskStatus> {
        self.announced
            .lock()
            .await
            .iter()
            .find(|(m, _)| m == message)
            .map(|(_, status)| *status)
    }

    async fn statuses_of(&self, id: &str) -> Vec<TaskStatus> {
        self.writes
            .lock()
            .await
            .iter()
            .filter(|t| t.id == id)
            .map(|t| t.status)
            .collect()
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn put(&self, task: &Task) -> Result<(), StoreError> {
        if let Some((status, remaining)) = self.put_failures.lock().await.as_mut() {
            if *status == task.status && *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Unavailable("write timed out".into()));
            }
        }
        self.writes.lock().await.push(task.clone());
        self.inner.put(task).await
    }

    async fn get(&self, id: &str) -> Result<Task, StoreError> {
        let held = self.held_get.lock().await.take();
        let result = self.inner.get(id).await;
        if let Some((reached, release)) = held {
            reached.notify_one();
            release.notified().await;
        }
        result
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        self.inner.list().await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.inner.count().await
    }

    async fn enqueue(&self, id: &str) -> Result<(), StoreError> {
        let retried = matches!(self.inner.get(id).await, Ok(task) if task.retry_count > 0);
        if retried
            && self
                .requeue_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::Unavailable("connection reset by peer".into()));
        }
        self.inner.enqueue(id).await
    }

    async fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<String>, StoreError> {
        let injected = self
            .dequeue_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("connection reset by peer".into()));
        }
        self.inner.dequeue_timeout(timeout).await
    }

    async fn queue_depth(&self) -> Result<usize, StoreError> {
        self.inner.queue_depth().await
    }

    async fn publish(&self, topic: &str, message: &str) -> Result<(), StoreError> {
        if let Some((id, _)) = message.rsplit_once(':') {
            if let Ok(task) = self.inner.get(id).await {
                self.announced
                    .lock()
                    .await
                    .push((message.to_string(), task.status));
            }
        }
        self.inner.publish(topic, message).await
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    store: Arc<RecordingStore>,
    queue: Arc<TaskQueue>,
    pool: WorkerPool,
    scheduler: JoinHandle<()>,
    webhooks: Arc<RecordingWebhookClient>,
    webhook_worker: JoinHandle<()>,
}

impl Harness {
    fn start(engine: ExecutionEngine, num_workers: usize) -> Self {
        let store = Arc::new(RecordingStore::new());
        let shared: SharedStore = store.clone();

        let webhooks = Arc::new(RecordingWebhookClient::default());
        let (dispatcher, webhook_worker) = WebhookDispatcher::spawn(webhooks.clone(), 16);
        let notifier = Notifier::new(EventPublisher::new(shared.clone(), "task_events"), dispatcher);
        let queue = Arc::new(TaskQueue::new(shared.clone(), notifier, num_workers));

        let config = WorkerPoolConfig::new(num_workers)
            .with_poll_interval(Duration::from_millis(10))
            .with_dequeue_backoff(Duration::from_millis(5))
            .with_shutdown_timeout(Duration::from_secs(5));
        let mut pool = WorkerPool::new(config, queue.clone(), Arc::new(engine));

        let scheduler = Scheduler::new(shared)
            .with_tick(Duration::from_millis(20))
            .spawn(pool.subscribe_shutdown());
        pool.start().expect("pool starts");

        Self {
            store,
            queue,
            pool,
            scheduler,
            webhooks,
            webhook_worker,
        }
    }

    async fn wait_for(&self, id: &str, status: TaskStatus) -> Task {
        for _ in 0..300 {
            let task = self.store.get(id).await.expect("task exists");
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached {status}");
    }

    /// Stops everything and waits for webhook deliveries to drain.
    async fn stop(self) -> (Arc<RecordingStore>, Arc<RecordingWebhookClient>) {
        let Harness {
            store,
            queue,
            mut pool,
            scheduler,
            webhooks,
            webhook_worker,
        } = self;

        pool.shutdown().await.expect("pool stops");
        scheduler.await.expect("scheduler stops");
        drop(pool);
        drop(queue);
        tokio::time::timeout(Duration::from_secs(2), webhook_worker)
            .await
            .expect("webhook worker drains")
            .expect("webhook worker exits cleanly");

        (store, webhooks)
    }
}

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(HandlerDelays::none())
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_email_retried_twice_then_completes() {
    let h = Harness::start(
        engine().with_handler("email", Arc::new(FlakyHandler::new(2))),
        3,
    );

    let task = h
        .queue
        .create_task(NewTask::new("email", "user@example.com"))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.max_retries, 2);

    let done = h.wait_for(&task.id, TaskStatus::Completed).await;
    assert_eq!(done.retry_count, 2);
    assert!(done.completed_at.is_some());
    assert!(done.error.is_empty());

    let (store, webhooks) = h.stop().await;
    assert!(webhooks.calls.lock().await.is_empty());

    let events = store.events().await;
    let completed = format!("{}:completed", task.id);
    assert_eq!(events.iter().filter(|e| **e == completed).count(), 1);
    assert_eq!(
        events,
        vec![
            format!("{}:created", task.id),
            format!("{}:retrying", task.id),
            format!("{}:retrying", task.id),
            completed,
        ]
    );
}

#[tokio::test]
async fn test_scheduled_image_runs_after_promotion() {
    let h = Harness::start(engine().with_handler("image", Arc::new(FlakyHandler::new(0))), 2);

    let task = h
        .queue
        .create_task(
            NewTask::new("image", "photo.png")
                .scheduled_for(Utc::now() + chrono::Duration::milliseconds(150)),
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Scheduled);
    assert!(h.store.inner.queued_ids().await.is_empty());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(h.store.get(&task.id).await.unwrap().status, TaskStatus::Scheduled);

    let done = h.wait_for(&task.id, TaskStatus::Completed).await;
    assert!(done.completed_at.is_some());
    assert_eq!(
        h.store.statuses_of(&task.id).await,
        vec![
            TaskStatus::Scheduled,
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
        ]
    );

    h.stop().await;
}

#[tokio::test]
async fn test_zero_retries_fails_on_first_error() {
    let h = Harness::start(
        engine().with_handler("email", Arc::new(FlakyHandler::new(usize::MAX))),
        1,
    );

    let task = h
        .queue
        .create_task(NewTask::new("email", "user@example.com").with_max_retries(0))
        .await
        .unwrap();
    assert_eq!(task.max_retries, 0);

    let failed = h.wait_for(&task.id, TaskStatus::Failed).await;
    assert_eq!(failed.retry_count, 0);
    assert!(failed.error.contains("smtp timeout #1"));
    assert!(failed.completed_at.is_none());

    // Explicit retry is refused and changes nothing.
    let same = h.queue.retry_task(&task.id).await.unwrap();
    assert_eq!(same, failed);

    let (store, _) = h.stop().await;
    let events = store.events().await;
    assert!(events.contains(&format!("{}:failed", task.id)));
    assert!(!events.contains(&format!("{}:retrying", task.id)));
}

#[tokio::test]
async fn test_stats_over_mixed_statuses() {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = Notifier::events_only(EventPublisher::new(store.clone(), "task_events"));
    let queue = TaskQueue::new(store.clone(), notifier, 3);

    let now = Utc::now();
    for status in [
        TaskStatus::Pending,
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ] {
        let mut task = NewTask::new("email", "u@x.com").into_task(now).unwrap();
        task.status = status;
        store.put(&task).await.unwrap();
        if status == TaskStatus::Pending {
            store.enqueue(&task.id).await.unwrap();
        }
    }

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.total_tasks, 5);
    assert_eq!(stats.pending_count, 2);
    assert_eq!(stats.processing_count, 1);
    assert_eq!(stats.completed_count, 1);
    assert_eq!(stats.failed_count, 1);
    assert_eq!(stats.scheduled_count, 0);
    assert_eq!(stats.worker_count, 3);
}

#[tokio::test]
async fn test_concurrent_creation_yields_distinct_tasks() {
    let store = Arc::new(InMemoryTaskStore::new());
    let notifier = Notifier::events_only(EventPublisher::new(store.clone(), "task_events"));
    let queue = Arc::new(TaskQueue::new(store.clone(), notifier, 3));

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .create_task(NewTask::new("email", format!("user{i}@example.com")))
                    .await
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let task = handle.await.unwrap().unwrap();
        assert!(queue.get_task(&task.id).await.is_ok());
        ids.insert(task.id);
    }

    assert_eq!(ids.len(), 50);
    assert_eq!(queue.list_tasks().await.unwrap().len(), 50);
    assert_eq!(store.queue_depth().await.unwrap(), 50);
}

#[tokio::test]
async fn test_every_recorded_transition_is_allowed() {
    let h = Harness::start(
        engine()
            .with_handler("email", Arc::new(FlakyHandler::new(3)))
            .with_handler("image", Arc::new(FlakyHandler::new(0))),
        3,
    );

    let mut ids = Vec::new();
    for i in 0..4 {
        let task = h
            .queue
            .create_task(NewTask::new("email", format!("u{i}@x.com")))
            .await
            .unwrap();
        ids.push(task.id);
    }
    let scheduled = h
        .queue
        .create_task(
            NewTask::new("image", "later.png")
                .scheduled_for(Utc::now() + chrono::Duration::milliseconds(30)),
        )
        .await
        .unwrap();
    ids.push(scheduled.id);

    for id in &ids {
        for _ in 0..300 {
            if h.store.get(id).await.unwrap().is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    let (store, _) = h.stop().await;

    let writes = store.writes.lock().await.clone();
    let mut history: HashMap<String, Vec<Task>> = HashMap::new();
    for task in writes {
        assert!(task.retry_count <= task.max_retries, "retry budget exceeded: {task:?}");
        history.entry(task.id.clone()).or_default().push(task);
    }

    for (id, versions) in history {
        for pair in versions.windows(2) {
            assert!(
                can_transition(pair[0].status, pair[1].status),
                "task {id}: {} -> {} is not allowed",
                pair[0].status,
                pair[1].status
            );
        }
        let last = versions.last().unwrap();
        assert!(last.is_terminal(), "task {id} ended in {}", last.status);
    }
}

#[tokio::test]
async fn test_stale_retry_overwrites_worker_failure() {
    let handler = Arc::new(FlakyHandler::new(usize::MAX));
    let h = Harness::start(engine().with_handler("email", handler.clone()), 1);

    // A failed record with a single retry left.
    let mut task = NewTask::new("email", "u@x.com")
        .with_max_retries(1)
        .into_task(Utc::now())
        .unwrap();
    task.status = TaskStatus::Failed;
    task.error = "smtp down".to_string();
    h.store.put(&task).await.unwrap();

    // One client reads the failed record, then stalls before writing back.
    let (reached, release) = h.store.hold_next_get().await;
    let stale = {
        let queue = h.queue.clone();
        let id = task.id.clone();
        tokio::spawn(async move { queue.retry_task(&id).await })
    };
    reached.notified().await;

    // Another client retries. The worker runs the attempt, it fails and no
    // budget remains, so the worker writes the task back as failed.
    let retried = h.queue.retry_task(&task.id).await.unwrap();
    assert_eq!(retried.retry_count, 1);
    let failed = h.wait_for(&task.id, TaskStatus::Failed).await;
    assert_eq!(failed.retry_count, 1);
    assert!(failed.is_terminal());

    // The stalled retry lands last and replaces the worker's write.
    release.notify_one();
    let overwritten = stale.await.unwrap().unwrap();
    assert_eq!(overwritten.status, TaskStatus::Pending);
    assert_eq!(overwritten.retry_count, 1);
    assert!(overwritten.error.is_empty());

    // The task runs again although its budget was spent.
    for _ in 0..300 {
        if handler.calls.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let refailed = h.wait_for(&task.id, TaskStatus::Failed).await;
    assert_eq!(refailed.retry_count, 1);

    let (store, _) = h.stop().await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        store.statuses_of(&task.id).await,
        vec![
            TaskStatus::Failed,
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Failed,
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Failed,
        ]
    );
}

#[tokio::test]
async fn test_outcome_write_is_retried_before_announcing() {
    let h = Harness::start(engine(), 1);
    h.store.fail_next_puts_of(TaskStatus::Completed, 2).await;

    let task = h
        .queue
        .create_task(NewTask::new("video", "clip.mp4").with_webhook("https://hooks.example.com/task"))
        .await
        .unwrap();

    let done = h.wait_for(&task.id, TaskStatus::Completed).await;
    assert!(done.completed_at.is_some());

    let (store, webhooks) = h.stop().await;
    assert_eq!(
        store.statuses_of(&task.id).await,
        vec![TaskStatus::Pending, TaskStatus::Processing, TaskStatus::Completed]
    );

    let completed = format!("{}:completed", task.id);
    assert_eq!(store.events().await, vec![format!("{}:created", task.id), completed.clone()]);
    assert_eq!(
        store.status_when_announced(&completed).await,
        Some(TaskStatus::Completed)
    );
    assert_eq!(webhooks.calls.lock().await.len(), 1);
}

#[tokio::test]
async fn test_failed_requeue_is_retried() {
    let h = Harness::start(engine().with_handler("email", Arc::new(FlakyHandler::new(1))), 1);
    h.store.fail_next_requeues(3);

    let task = h
        .queue
        .create_task(NewTask::new("email", "u@x.com"))
        .await
        .unwrap();

    let done = h.wait_for(&task.id, TaskStatus::Completed).await;
    assert_eq!(done.retry_count, 1);
    assert_eq!(h.store.requeue_failures.load(Ordering::SeqCst), 0);

    let (store, _) = h.stop().await;
    let retrying = format!("{}:retrying", task.id);
    assert_eq!(
        store.status_when_announced(&retrying).await,
        Some(TaskStatus::Pending)
    );
    assert!(store.inner.queued_ids().await.is_empty());
}

#[tokio::test]
async fn test_worker_survives_dequeue_failures() {
    let h = Harness::start(engine(), 1);
    h.store.fail_next_dequeues(5);

    let task = h
        .queue
        .create_task(NewTask::new("video", "clip.mp4"))
        .await
        .unwrap();

    let done = h.wait_for(&task.id, TaskStatus::Completed).await;
    assert!(done.completed_at.is_some());
    assert_eq!(h.store.dequeue_failures.load(Ordering::SeqCst), 0);

    h.stop().await;
}

#[tokio::test]
async fn test_handler_panic_fails_task_and_worker_keeps_going() {
    let h = Harness::start(
        engine()
            .with_handler("image", Arc::new(PanickingHandler))
            .with_handler("email", Arc::new(FlakyHandler::new(0))),
        1,
    );

    let crashing = h
        .queue
        .create_task(NewTask::new("image", "corrupt.png").with_max_retries(0))
        .await
        .unwrap();
    let after = h
        .queue
        .create_task(NewTask::new("email", "u@x.com"))
        .await
        .unwrap();

    let failed = h.wait_for(&crashing.id, TaskStatus::Failed).await;
    assert!(failed.error.contains("image decoder crashed"), "error was {:?}", failed.error);

    // The single worker is still alive and picks up the next task.
    h.wait_for(&after.id, TaskStatus::Completed).await;

    h.stop().await;
}

#[tokio::test]
async fn test_webhook_delivered_once_on_completion() {
    let h = Harness::start(engine().with_handler("email", Arc::new(FlakyHandler::new(1))), 2);

    let with_hook = h
        .queue
        .create_task(
            NewTask::new("email", "u@x.com").with_webhook("https://hooks.example.com/task"),
        )
        .await
        .unwrap();
    let without_hook = h
        .queue
        .create_task(NewTask::new("video", "clip.mp4"))
        .await
        .unwrap();

    h.wait_for(&with_hook.id, TaskStatus::Completed).await;
    h.wait_for(&without_hook.id, TaskStatus::Completed).await;

    let (_, webhooks) = h.stop().await;
    let calls = webhooks.calls.lock().await.clone();
    assert_eq!(calls.len(), 1);

    let (url, body) = &calls[0];
    assert_eq!(url, "https://hooks.example.com/task");
    let delivered: Task = serde_json::from_str(body).unwrap();
    assert_eq!(delivered.id, with_hook.id);
    assert_eq!(delivered.status, TaskStatus::Completed);
    assert_eq!(delivered.retry_count, 1);
}

#[tokio::test]
async fn test_explicit_retry_requeues_failed_task() {
    let h = Harness::start(
        engine().with_handler("email", Arc::new(FlakyHandler::new(1))),
        1,
    );

    // A failed record with the default budget of two.
    let mut task = NewTask::new("email", "u@x.com").into_task(Utc::now()).unwrap();
    task.status = TaskStatus::Failed;
    task.error = "smtp down".to_string();
    h.store.put(&task).await.unwrap();

    let retried = h.queue.retry_task(&task.id).await.unwrap();
    assert_eq!(retried.status, TaskStatus::Pending);
    assert_eq!(retried.retry_count, 1);

    // The handler fails once more; one retry remains, so it still completes.
    let done = h.wait_for(&task.id, TaskStatus::Completed).await;
    assert_eq!(done.retry_count, 2);

    h.stop().await;
}
