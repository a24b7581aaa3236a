//! Runtime configuration for the queue, workers and collaborators.
//!
//! Values come from the process environment, optionally seeded from a
//! `.env` file in the working directory. Variables already present in the
//! environment take precedence over the file.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::executor::{HandlerDelays, UnknownTypePolicy};
use crate::mail::SmtpConfig;
use crate::notify::{DEFAULT_EVENTS_TOPIC, DEFAULT_WEBHOOK_CAPACITY};
use crate::store::RedisKeys;

const DELAY_PREFIX: &str = "TASKQUEUE_DELAY_";
const DELAY_SUFFIX: &str = "_MS";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading a `.env` file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How completion webhooks are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WebhookMode {
    /// Log the payload without making a request.
    #[default]
    Log,
    /// POST the payload over HTTP.
    Http,
}

impl std::str::FromStr for WebhookMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(WebhookMode::Log),
            "http" => Ok(WebhookMode::Http),
            other => Err(format!("expected 'log' or 'http', got '{other}'")),
        }
    }
}

/// Configuration for a taskqueue process.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    // Store settings
    /// Redis connection URL.
    pub redis_url: String,
    /// Key names for the record hash and the queue list.
    pub redis_keys: RedisKeys,
    /// Pub/sub topic for task events.
    pub events_topic: String,

    // Dispatch settings
    /// Number of workers in the pool.
    pub worker_count: usize,
    /// Interval between scheduler scans.
    pub scheduler_tick: Duration,
    /// Pause after a failed dequeue.
    pub dequeue_backoff: Duration,
    /// How long shutdown waits for busy workers.
    pub shutdown_timeout: Duration,

    // Execution settings
    /// Simulated processing latency per task type.
    pub delays: HandlerDelays,
    /// Behavior for task types without a handler.
    pub unknown_types: UnknownTypePolicy,

    // Notification settings
    pub webhook_mode: WebhookMode,
    /// Capacity of the webhook dispatch channel.
    pub webhook_capacity: usize,
    /// Outbound mail settings.
    pub smtp: SmtpConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            redis_keys: RedisKeys::default(),
            events_topic: DEFAULT_EVENTS_TOPIC.to_string(),

            worker_count: 3,
            scheduler_tick: Duration::from_secs(5),
            dequeue_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),

            delays: HandlerDelays::default(),
            unknown_types: UnknownTypePolicy::Succeed,

            webhook_mode: WebhookMode::Log,
            webhook_capacity: DEFAULT_WEBHOOK_CAPACITY,
            smtp: SmtpConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from the environment, seeded from `.env` in the
    /// working directory when that file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let dotenv = read_dotenv(Path::new(".env"))?;
        Self::from_vars(layer_vars(dotenv, std::env::vars()))
    }

    /// Creates configuration from environment variables only.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: Redis URL or `host:port` (default: redis://localhost:6379)
    /// - `REDIS_PASSWORD`: Password added to the URL when it carries none
    /// - `UPSTASH_REDIS_REST_URL` / `UPSTASH_REDIS_REST_TOKEN`: Upstash
    ///   endpoint, used over TLS on port 6379 instead of `REDIS_URL`
    /// - `TASKQUEUE_TASKS_KEY`: Record hash key (default: tasks)
    /// - `TASKQUEUE_QUEUE_KEY`: Queue list key (default: task_queue)
    /// - `TASKQUEUE_EVENTS_TOPIC`: Pub/sub topic (default: task_events)
    /// - `TASKQUEUE_WORKERS`: Worker count (default: 3)
    /// - `TASKQUEUE_SCHEDULER_TICK_SECS`: Scheduler interval (default: 5)
    /// - `TASKQUEUE_DEQUEUE_BACKOFF_MS`: Backoff after dequeue errors (default: 1000)
    /// - `TASKQUEUE_SHUTDOWN_TIMEOUT_SECS`: Graceful shutdown bound (default: 30)
    /// - `TASKQUEUE_DELAY_DEFAULT_MS`, `TASKQUEUE_DELAY_<TYPE>_MS`: Simulated latency
    /// - `TASKQUEUE_STRICT_TYPES`: Fail unknown task types (default: false)
    /// - `TASKQUEUE_WEBHOOK_MODE`: `log` or `http` (default: log)
    /// - `TASKQUEUE_WEBHOOK_CAPACITY`: Webhook channel capacity (default: 256)
    /// - `MAILTRAP_HOST`, `MAILTRAP_PORT`, `MAILTRAP_USERNAME`,
    ///   `MAILTRAP_PASSWORD`, `MAILTRAP_FROM`: SMTP settings
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Creates configuration from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let get = |key: &str| vars.get(key).map(|v| v.trim());

        let mut config = Self::default();

        // Store settings
        if let Some(upstash) = get("UPSTASH_REDIS_REST_URL") {
            config.redis_url = upstash_redis_url(upstash, get("UPSTASH_REDIS_REST_TOKEN"));
        } else if let Some(url) = get("REDIS_URL") {
            config.redis_url = normalize_redis_url(url);
        }
        if let Some(password) = get("REDIS_PASSWORD") {
            config.redis_url = with_password(&config.redis_url, password);
        }

        if let Some(val) = get("TASKQUEUE_TASKS_KEY") {
            config.redis_keys.tasks = val.to_string();
        }
        if let Some(val) = get("TASKQUEUE_QUEUE_KEY") {
            config.redis_keys.queue = val.to_string();
        }
        if let Some(val) = get("TASKQUEUE_EVENTS_TOPIC") {
            config.events_topic = val.to_string();
        }

        // Dispatch settings
        if let Some(val) = get("TASKQUEUE_WORKERS") {
            config.worker_count = parse_env_value(val, "TASKQUEUE_WORKERS")?;
        }
        if let Some(val) = get("TASKQUEUE_SCHEDULER_TICK_SECS") {
            let secs: u64 = parse_env_value(val, "TASKQUEUE_SCHEDULER_TICK_SECS")?;
            config.scheduler_tick = Duration::from_secs(secs);
        }
        if let Some(val) = get("TASKQUEUE_DEQUEUE_BACKOFF_MS") {
            let ms: u64 = parse_env_value(val, "TASKQUEUE_DEQUEUE_BACKOFF_MS")?;
            config.dequeue_backoff = Duration::from_millis(ms);
        }
        if let Some(val) = get("TASKQUEUE_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(val, "TASKQUEUE_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        // Execution settings
        for (key, val) in &vars {
            let Some(task_type) = key
                .strip_prefix(DELAY_PREFIX)
                .and_then(|rest| rest.strip_suffix(DELAY_SUFFIX))
            else {
                continue;
            };
            let ms: u64 = parse_env_value(val.trim(), key)?;
            let delay = Duration::from_millis(ms);
            config.delays = if task_type == "DEFAULT" {
                config.delays.with_default(delay)
            } else {
                config.delays.with_delay(task_type.to_ascii_lowercase(), delay)
            };
        }

        if let Some(val) = get("TASKQUEUE_STRICT_TYPES") {
            if parse_env_bool(val, "TASKQUEUE_STRICT_TYPES")? {
                config.unknown_types = UnknownTypePolicy::Fail;
            }
        }

        // Notification settings
        if let Some(val) = get("TASKQUEUE_WEBHOOK_MODE") {
            config.webhook_mode = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "TASKQUEUE_WEBHOOK_MODE".to_string(),
                message,
            })?;
        }
        if let Some(val) = get("TASKQUEUE_WEBHOOK_CAPACITY") {
            config.webhook_capacity = parse_env_value(val, "TASKQUEUE_WEBHOOK_CAPACITY")?;
        }

        if let Some(val) = get("MAILTRAP_HOST") {
            config.smtp.host = val.to_string();
        }
        if let Some(val) = get("MAILTRAP_PORT") {
            config.smtp.port = parse_env_value(val, "MAILTRAP_PORT")?;
        }
        config.smtp.username = get("MAILTRAP_USERNAME").map(str::to_string);
        config.smtp.password = get("MAILTRAP_PASSWORD").map(str::to_string);
        if let Some(val) = get("MAILTRAP_FROM") {
            config.smtp.from = val.to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        if self.scheduler_tick.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "scheduler_tick must be greater than 0".to_string(),
            ));
        }

        if self.webhook_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "webhook_capacity must be greater than 0".to_string(),
            ));
        }

        if self.redis_keys.tasks.is_empty() || self.redis_keys.queue.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis key names cannot be empty".to_string(),
            ));
        }

        if self.redis_keys.tasks == self.redis_keys.queue {
            return Err(ConfigError::ValidationFailed(
                "tasks key and queue key must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Sets the worker count.
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Sets the scheduler interval.
    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick;
        self
    }

    /// Sets the simulated handler latencies.
    pub fn with_delays(mut self, delays: HandlerDelays) -> Self {
        self.delays = delays;
        self
    }
}

/// Reads `KEY=VALUE` pairs from a dotenv file.
///
/// A missing file yields no variables. Blank lines and `#` comments are
/// skipped; surrounding quotes on values are removed.
pub fn read_dotenv(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };

    let mut vars = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            vars.insert(key.trim().to_string(), value.to_string());
        }
    }
    Ok(vars)
}

/// Turns an Upstash REST endpoint into a TLS Redis URL on port 6379.
/// Overlays process variables on `.env` entries. Blank process values do
/// not hide a `.env` entry.
fn layer_vars<I>(mut base: HashMap<String, String>, overrides: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    base.extend(overrides.into_iter().filter(|(_, value)| !value.trim().is_empty()));
    base
}

fn upstash_redis_url(rest_url: &str, token: Option<&str>) -> String {
    let host = rest_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(rest_url);
    let host = host.split(['/', ':']).next().unwrap_or(host);

    match token {
        Some(token) => format!(
            "rediss://default:{}@{}:6379",
            urlencoding::encode(token),
            host
        ),
        None => format!("rediss://{}:6379", host),
    }
}

/// Accepts both full URLs and bare `host:port` addresses.
fn normalize_redis_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("redis://{url}")
    }
}

/// Adds a password to a Redis URL that does not already carry credentials.
fn with_password(url: &str, password: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) if !rest.contains('@') => {
            format!("{scheme}://:{}@{rest}", urlencoding::encode(password))
        }
        _ => url.to_string(),
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", value),
        }),
    }
}
