//! Completion webhooks.
//!
//! Workers hand completed tasks to a [`WebhookDispatcher`], which forwards
//! them over a bounded channel to a dedicated notification task. Each
//! delivery runs in its own spawned task; a failure or panic there is
//! logged and goes no further. Deliveries are never retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::NotifyError;
use crate::task::Task;

/// Default capacity of the dispatcher channel.
pub const DEFAULT_WEBHOOK_CAPACITY: usize = 256;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers a webhook body to an external URL.
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn post(&self, url: &str, body: &str) -> Result<(), NotifyError>;
}

/// Webhook client that only logs what it would send.
///
/// The default client until real delivery is switched on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingWebhookClient;

#[async_trait]
impl WebhookClient for LoggingWebhookClient {
    async fn post(&self, url: &str, body: &str) -> Result<(), NotifyError> {
        info!(url = %url, payload = %body, "Webhook (log only)");
        Ok(())
    }
}

/// Webhook client that POSTs JSON over HTTP.
pub struct HttpWebhookClient {
    http_client: Client,
}

impl HttpWebhookClient {
    /// Creates a client with a 10 second request timeout.
    pub fn new() -> Result<Self, NotifyError> {
        let http_client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Webhook {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn post(&self, url: &str, body: &str) -> Result<(), NotifyError> {
        let to_error = |e: reqwest::Error| NotifyError::Webhook {
            url: url.to_string(),
            reason: e.to_string(),
        };

        self.http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(to_error)?
            .error_for_status()
            .map_err(to_error)?;

        Ok(())
    }
}

/// Handle for queueing completion webhooks.
#[derive(Clone)]
pub struct WebhookDispatcher {
    tx: mpsc::Sender<Task>,
}

impl WebhookDispatcher {
    /// Starts the notification task and returns a handle to it.
    ///
    /// The task exits once every dispatcher clone has been dropped and the
    /// in-flight deliveries have finished.
    pub fn spawn(client: Arc<dyn WebhookClient>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_deliveries(rx, client));
        (Self { tx }, handle)
    }

    /// Queues a webhook for the task if it declares one.
    ///
    /// Never waits: when the channel is full the notification is dropped.
    /// Returns whether a delivery was queued.
    pub fn dispatch(&self, task: &Task) -> bool {
        if task.webhook.is_none() {
            return false;
        }

        match self.tx.try_send(task.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(task_id = %task.id, "Webhook queue full, dropping notification");
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                warn!(task_id = %task.id, error = %NotifyError::ChannelClosed, "Webhook dispatcher stopped");
                false
            }
        }
    }
}

type DeliveryResult = (String, String, Result<(), NotifyError>);

async fn run_deliveries(mut rx: mpsc::Receiver<Task>, client: Arc<dyn WebhookClient>) {
    let mut in_flight: JoinSet<DeliveryResult> = JoinSet::new();

    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(task) => {
                    let Some(url) = task.webhook.clone() else { continue };
                    let body = match serde_json::to_string(&task) {
                        Ok(body) => body,
                        Err(e) => {
                            warn!(task_id = %task.id, error = %e, "Failed to serialize webhook payload");
                            continue;
                        }
                    };
                    info!(task_id = %task.id, url = %url, "Sending webhook");
                    let client = Arc::clone(&client);
                    in_flight.spawn(async move {
                        let result = client.post(&url, &body).await;
                        (task.id, url, result)
                    });
                }
                None => break,
            },
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => log_delivery(done),
        }
    }

    while let Some(done) = in_flight.join_next().await {
        log_delivery(done);
    }
    debug!("Webhook dispatcher stopped");
}

fn log_delivery(done: Result<DeliveryResult, JoinError>) {
    match done {
        Ok((task_id, url, Ok(()))) => debug!(task_id = %task_id, url = %url, "Webhook delivered"),
        Ok((task_id, url, Err(e))) => {
            warn!(task_id = %task_id, url = %url, error = %e, "Webhook delivery failed")
        }
        Err(e) => error!(error = %e, "Webhook delivery panicked"),
    }
}
