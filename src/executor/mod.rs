//! Execution engine: runs a task's handler and reports the outcome as a value.
//!
//! Handlers are looked up by task type in a fixed registry. Every run is
//! preceded by a per-type simulated processing delay. Handler errors and
//! handler panics both come back as [`ExecutionError`]; nothing raised
//! inside a handler reaches the worker loop.

pub mod handlers;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::mail::Mailer;
use crate::task::Task;

pub use handlers::{EmailHandler, ImageHandler, WebhookCallHandler, EMAIL_BODY, EMAIL_SUBJECT};

/// Work performed for one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), ExecutionError>;
}

/// What to do with a task whose type has no registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownTypePolicy {
    /// Log and report success without doing any work.
    #[default]
    Succeed,
    /// Report an immediate `ExecutionError::UnknownType`.
    Fail,
}

/// Simulated processing latency per task type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDelays {
    default: Duration,
    per_type: HashMap<String, Duration>,
}

impl Default for HandlerDelays {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(2))
            .with_delay("email", Duration::from_secs(2))
            .with_delay("image", Duration::from_secs(3))
            .with_delay("webhook", Duration::from_secs(2))
    }
}

impl HandlerDelays {
    /// Uses the same delay for every type.
    pub fn uniform(delay: Duration) -> Self {
        Self {
            default: delay,
            per_type: HashMap::new(),
        }
    }

    /// No simulated latency at all.
    pub fn none() -> Self {
        Self::uniform(Duration::ZERO)
    }

    /// Overrides the delay for one task type.
    pub fn with_delay(mut self, task_type: impl Into<String>, delay: Duration) -> Self {
        self.per_type.insert(task_type.into(), delay);
        self
    }

    /// Sets the delay for types without an override.
    pub fn with_default(mut self, delay: Duration) -> Self {
        self.default = delay;
        self
    }

    /// Returns the delay applied before running a task of this type.
    pub fn for_type(&self, task_type: &str) -> Duration {
        self.per_type
            .get(task_type)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Maps task types to handlers and runs them.
pub struct ExecutionEngine {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    delays: HandlerDelays,
    unknown_types: UnknownTypePolicy,
}

impl ExecutionEngine {
    /// Creates an engine with no handlers registered.
    pub fn new(delays: HandlerDelays) -> Self {
        Self {
            handlers: HashMap::new(),
            delays,
            unknown_types: UnknownTypePolicy::default(),
        }
    }

    /// Creates an engine with the `email`, `image` and `webhook` handlers.
    pub fn with_builtin_handlers(mailer: Arc<dyn Mailer>, delays: HandlerDelays) -> Self {
        Self::new(delays)
            .with_handler("email", Arc::new(EmailHandler::new(mailer)))
            .with_handler("image", Arc::new(ImageHandler))
            .with_handler("webhook", Arc::new(WebhookCallHandler))
    }

    /// Registers (or replaces) the handler for a task type.
    pub fn with_handler(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    /// Sets the behavior for unregistered task types.
    pub fn with_unknown_type_policy(mut self, policy: UnknownTypePolicy) -> Self {
        self.unknown_types = policy;
        self
    }

    /// Returns whether a handler is registered for the type.
    pub fn has_handler(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Runs the task's handler after the simulated delay for its type.
    pub async fn execute(&self, task: &Task) -> Result<(), ExecutionError> {
        let delay = self.delays.for_type(&task.task_type);
        if !delay.is_zero() {
            debug!(task_id = %task.id, delay_ms = delay.as_millis() as u64, "Simulating work");
            tokio::time::sleep(delay).await;
        }

        let Some(handler) = self.handlers.get(&task.task_type).cloned() else {
            return match self.unknown_types {
                UnknownTypePolicy::Succeed => {
                    warn!(task_id = %task.id, task_type = %task.task_type, "Unknown task type, nothing to do");
                    Ok(())
                }
                UnknownTypePolicy::Fail => Err(ExecutionError::UnknownType(task.task_type.clone())),
            };
        };

        // Run on its own task so a panicking handler surfaces as a JoinError
        // instead of unwinding through the worker.
        let task = task.clone();
        match tokio::spawn(async move { handler.handle(&task).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ExecutionError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(ExecutionError::Panicked(e.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;
    use chrono::Utc;
    use std::time::Instant;

    struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        async fn handle(&self, _task: &Task) -> Result<(), ExecutionError> {
            Err(ExecutionError::Handler("disk full".to_string()))
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl TaskHandler for PanickingHandler {
        async fn handle(&self, _task: &Task) -> Result<(), ExecutionError> {
            panic!("handler exploded");
        }
    }

    fn task(task_type: &str) -> Task {
        NewTask::new(task_type, "payload")
            .into_task(Utc::now())
            .unwrap()
    }

    #[test]
    fn test_default_delays() {
        let delays = HandlerDelays::default();
        assert_eq!(delays.for_type("email"), Duration::from_secs(2));
        assert_eq!(delays.for_type("image"), Duration::from_secs(3));
        assert_eq!(delays.for_type("webhook"), Duration::from_secs(2));
        assert_eq!(delays.for_type("anything"), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_handler_error_is_returned() {
        let engine = ExecutionEngine::new(HandlerDelays::none())
            .with_handler("flaky", Arc::new(FailingHandler));

        let err = engine.execute(&task("flaky")).await.unwrap_err();
        assert_eq!(err, ExecutionError::Handler("disk full".to_string()));
    }

    #[tokio::test]
    async fn test_handler_panic_is_captured() {
        let engine = ExecutionEngine::new(HandlerDelays::none())
            .with_handler("boom", Arc::new(PanickingHandler));

        let err = engine.execute(&task("boom")).await.unwrap_err();
        assert_eq!(err, ExecutionError::Panicked("handler exploded".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_type_succeeds_by_default() {
        let engine = ExecutionEngine::new(HandlerDelays::none());
        assert!(engine.execute(&task("mystery")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_type_fails_in_strict_mode() {
        let engine = ExecutionEngine::new(HandlerDelays::none())
            .with_unknown_type_policy(UnknownTypePolicy::Fail);
        let err = engine.execute(&task("mystery")).await.unwrap_err();
        assert_eq!(err, ExecutionError::UnknownType("mystery".to_string()));
    }

    #[tokio::test]
    async fn test_delay_is_applied_per_type() {
        let delays = HandlerDelays::none().with_delay("image", Duration::from_millis(50));
        let engine = ExecutionEngine::new(delays).with_handler("image", Arc::new(ImageHandler));

        let start = Instant::now();
        engine.execute(&task("image")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_builtin_handlers_registered() {
        let mailer = Arc::new(crate::mail::SmtpMailer::new(Default::default()));
        let engine = ExecutionEngine::with_builtin_handlers(mailer, HandlerDelays::none());
        assert!(engine.has_handler("email"));
        assert!(engine.has_handler("image"));
        assert!(engine.has_handler("webhook"));
        assert!(!engine.has_handler("video"));
    }
}
