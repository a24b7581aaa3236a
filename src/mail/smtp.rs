//! SMTP mailer (Mailtrap by default) built on async lettre.
//!
//! Without credentials the mailer runs in demo mode: the message is logged
//! and reported as sent.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use super::Mailer;
use crate::error::ExecutionError;

/// SMTP connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "sandbox.smtp.mailtrap.io".to_string(),
            port: 2525,
            username: None,
            password: None,
            from: "noreply@taskqueue.local".to_string(),
        }
    }
}

impl SmtpConfig {
    /// Returns the credentials when both username and password are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some(Credentials::new(user.to_string(), pass.to_string()))
            }
            _ => None,
        }
    }

    /// Returns whether messages will only be logged.
    pub fn is_demo_mode(&self) -> bool {
        self.credentials().is_none()
    }
}

/// Mailer that delivers through an SMTP relay.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        if config.is_demo_mode() {
            warn!("SMTP credentials not set, emails will be logged only");
        } else {
            info!(host = %config.host, port = config.port, "Email sender initialized");
        }
        Self { config }
    }

    fn build_message(&self, to: &str, subject: &str, body: &str) -> Result<Message, ExecutionError> {
        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| ExecutionError::Mail(format!("invalid from address: {e}")))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| ExecutionError::Mail(format!("invalid recipient '{to}': {e}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| ExecutionError::Mail(format!("build email: {e}")))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ExecutionError> {
        info!(to = %to, subject = %subject, "Sending email");

        let Some(creds) = self.config.credentials() else {
            info!(to = %to, body = %body, "Demo mode: email logged but not sent");
            return Ok(());
        };

        let message = self.build_message(to, subject, body)?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| ExecutionError::Mail(format!("SMTP relay: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .build();

        mailer.send(message).await.map_err(|e| {
            warn!(to = %to, error = %e, "Failed to send email");
            ExecutionError::Mail(format!("SMTP send: {e}"))
        })?;

        info!(to = %to, host = %self.config.host, "Email sent");
        Ok(())
    }
}
