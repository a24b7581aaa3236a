//! Outbound email collaborator used by the `email` task handler.

pub mod smtp;

use async_trait::async_trait;

use crate::error::ExecutionError;

pub use smtp::{SmtpConfig, SmtpMailer};

/// Sends a single plain-text email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ExecutionError>;
}
