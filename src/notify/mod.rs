//! Best-effort task notifications.
//!
//! Two independent channels, neither of which can affect task state:
//!
//! - **Events**: `"<id>:<event>"` messages published on the store's
//!   pub/sub topic on creation and after every processing outcome
//! - **Webhooks**: the completed task record POSTed to the task's
//!   `webhook` URL, delivered off the worker's path (see [`webhook`])

pub mod webhook;

use tracing::warn;

use crate::store::SharedStore;
use crate::task::Task;

pub use webhook::{
    HttpWebhookClient, LoggingWebhookClient, WebhookClient, WebhookDispatcher,
    DEFAULT_WEBHOOK_CAPACITY,
};

/// Default pub/sub topic for task events.
pub const DEFAULT_EVENTS_TOPIC: &str = "task_events";

/// Lifecycle events announced on the event topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    Created,
    Completed,
    Retrying,
    Failed,
}

impl TaskEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEvent::Created => "created",
            TaskEvent::Completed => "completed",
            TaskEvent::Retrying => "retrying",
            TaskEvent::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formats the message published for a task event.
pub fn event_message(task_id: &str, event: TaskEvent) -> String {
    format!("{task_id}:{event}")
}

/// Publishes task events on the store's pub/sub channel.
#[derive(Clone)]
pub struct EventPublisher {
    store: SharedStore,
    topic: String,
}

impl EventPublisher {
    pub fn new(store: SharedStore, topic: impl Into<String>) -> Self {
        Self {
            store,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes an event. Failures are logged and swallowed.
    pub async fn publish(&self, task_id: &str, event: TaskEvent) {
        let message = event_message(task_id, event);
        if let Err(e) = self.store.publish(&self.topic, &message).await {
            warn!(task_id = %task_id, event = %event, error = %e, "Error publishing event");
        }
    }
}

/// Fans task outcomes out to the event topic and completion webhooks.
#[derive(Clone)]
pub struct Notifier {
    events: EventPublisher,
    webhooks: Option<WebhookDispatcher>,
}

impl Notifier {
    pub fn new(events: EventPublisher, webhooks: WebhookDispatcher) -> Self {
        Self {
            events,
            webhooks: Some(webhooks),
        }
    }

    /// A notifier that publishes events but never sends webhooks.
    pub fn events_only(events: EventPublisher) -> Self {
        Self {
            events,
            webhooks: None,
        }
    }

    /// Announces a newly created task.
    pub async fn task_created(&self, task: &Task) {
        self.events.publish(&task.id, TaskEvent::Created).await;
    }

    /// Announces the outcome of a processing attempt.
    ///
    /// Completion additionally queues the task's webhook, if any.
    pub async fn task_processed(&self, task: &Task, event: TaskEvent) {
        if event == TaskEvent::Completed {
            if let Some(webhooks) = &self.webhooks {
                webhooks.dispatch(task);
            }
        }
        self.events.publish(&task.id, event).await;
    }
}
