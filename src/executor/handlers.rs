//! Built-in task handlers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::TaskHandler;
use crate::error::ExecutionError;
use crate::mail::Mailer;
use crate::task::Task;

/// Subject line of the message sent by the `email` handler.
pub const EMAIL_SUBJECT: &str = "Task Queue Notification";

/// Body of the message sent by the `email` handler.
pub const EMAIL_BODY: &str = "Your email task has been processed by the task queue system!";

/// Sends a fixed notification email to the address in the task payload.
pub struct EmailHandler {
    mailer: Arc<dyn Mailer>,
}

impl EmailHandler {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl TaskHandler for EmailHandler {
    async fn handle(&self, task: &Task) -> Result<(), ExecutionError> {
        self.mailer
            .send(&task.payload, EMAIL_SUBJECT, EMAIL_BODY)
            .await
    }
}

/// Stand-in for image processing. Logs the payload and succeeds.
pub struct ImageHandler;

#[async_trait]
impl TaskHandler for ImageHandler {
    async fn handle(&self, task: &Task) -> Result<(), ExecutionError> {
        info!(task_id = %task.id, payload = %task.payload, "Processing image");
        Ok(())
    }
}

/// Stand-in for calling an external URL as a unit of work. Logs the payload
/// and succeeds.
///
/// Unrelated to completion webhooks, which the notifier delivers.
pub struct WebhookCallHandler;

#[async_trait]
impl TaskHandler for WebhookCallHandler {
    async fn handle(&self, task: &Task) -> Result<(), ExecutionError> {
        info!(task_id = %task.id, url = %task.payload, "Calling webhook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;
    use chrono::Utc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ExecutionError> {
            self.sent
                .lock()
                .await
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_email_handler_addresses_payload() {
        let mailer = Arc::new(RecordingMailer::default());
        let handler = EmailHandler::new(mailer.clone());
        let task = NewTask::new("email", "u@x.com")
            .into_task(Utc::now())
            .unwrap();

        handler.handle(&task).await.unwrap();

        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "u@x.com");
        assert_eq!(sent[0].1, EMAIL_SUBJECT);
        assert_eq!(sent[0].2, EMAIL_BODY);
    }

    #[tokio::test]
    async fn test_stub_handlers_succeed() {
        let task = NewTask::new("image", "cat.png")
            .into_task(Utc::now())
            .unwrap();
        assert!(ImageHandler.handle(&task).await.is_ok());
        assert!(WebhookCallHandler.handle(&task).await.is_ok());
    }
}
