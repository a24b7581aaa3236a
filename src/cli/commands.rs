//! CLI command definitions for taskqueue.
//!
//! `serve` runs the worker pool and scheduler against the configured store;
//! the other commands are one-shot producer operations that print JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use clap::Parser;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{QueueConfig, WebhookMode};
use crate::error::ValidationError;
use crate::executor::ExecutionEngine;
use crate::mail::SmtpMailer;
use crate::metrics::{export_metrics, init_metrics};
use crate::notify::{
    EventPublisher, HttpWebhookClient, LoggingWebhookClient, Notifier, WebhookClient,
    WebhookDispatcher,
};
use crate::scheduler::{Scheduler, TaskQueue, WorkerPool, WorkerPoolConfig};
use crate::store::{InMemoryTaskStore, RedisTaskStore, SharedStore};
use crate::task::NewTask;

/// How long `serve` waits for in-flight webhooks after the workers stop.
const WEBHOOK_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Durable task queue with workers, retries and scheduled tasks.
#[derive(Parser)]
#[command(name = "taskqueue")]
#[command(about = "Durable task queue backed by Redis")]
#[command(version)]
#[command(
    long_about = "taskqueue accepts tasks, dispatches them to a pool of workers, retries failures and promotes scheduled tasks when they come due.\n\nExample usage:\n  taskqueue serve\n  taskqueue submit --type email --payload user@example.com\n  taskqueue stats"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Use a process-local store instead of Redis.
    #[arg(long, global = true)]
    pub in_memory: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the worker pool and scheduler until interrupted.
    Serve(ServeArgs),

    /// Create a task and print it.
    Submit(SubmitArgs),

    /// Print a task by id.
    Get {
        /// Task id.
        id: String,
    },

    /// Print every stored task.
    #[command(alias = "ls")]
    List,

    /// Put a failed task back on the queue if it has retries left.
    Retry {
        /// Task id.
        id: String,
    },

    /// Print queue statistics.
    Stats,
}

/// Arguments for `taskqueue serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Number of workers (overrides TASKQUEUE_WORKERS).
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Scheduler interval in seconds (overrides TASKQUEUE_SCHEDULER_TICK_SECS).
    #[arg(long)]
    pub tick_secs: Option<u64>,
}

/// Arguments for `taskqueue submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Task type (email, image, webhook, ...).
    #[arg(short = 't', long = "type")]
    pub task_type: String,

    /// Handler input, e.g. the recipient address for email tasks.
    #[arg(short = 'p', long)]
    pub payload: String,

    /// Advisory priority, 1 (low) to 5 (high).
    #[arg(long)]
    pub priority: Option<i32>,

    /// Run the task this many seconds from now.
    #[arg(long, conflicts_with = "scheduled_for")]
    pub scheduled_in: Option<u64>,

    /// Run the task at this RFC3339 time.
    #[arg(long)]
    pub scheduled_for: Option<String>,

    /// URL notified with the task record on completion.
    #[arg(long)]
    pub webhook: Option<String>,

    /// Retry budget (default 2).
    #[arg(long)]
    pub max_retries: Option<u32>,
}

impl SubmitArgs {
    fn into_request(self, now: DateTime<Utc>) -> anyhow::Result<NewTask> {
        let scheduled_for = match (self.scheduled_in, self.scheduled_for) {
            (Some(secs), _) => {
                let at = i64::try_from(secs)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .and_then(|delay| now.checked_add_signed(delay))
                    .ok_or_else(|| {
                        ValidationError::InvalidTimestamp(format!("--scheduled-in {secs} is out of range"))
                    })?;
                Some(at)
            }
            (None, Some(raw)) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| ValidationError::InvalidTimestamp(format!("{raw}: {e}")))?
                    .with_timezone(&Utc),
            ),
            (None, None) => None,
        };

        Ok(NewTask {
            task_type: self.task_type,
            payload: self.payload,
            priority: self.priority,
            scheduled_for,
            webhook: self.webhook,
            max_retries: self.max_retries,
        })
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = QueueConfig::load().context("Failed to load configuration")?;
    let store = connect_store(&config, cli.in_memory).await?;

    match cli.command {
        Commands::Serve(args) => run_serve_command(config, store, args).await,
        Commands::Submit(args) => {
            if cli.in_memory {
                warn!("Using an in-memory store; the task is discarded when this command exits");
            }
            let queue = producer_queue(&config, store);
            let task = queue.create_task(args.into_request(Utc::now())?).await?;
            print_json(&task)
        }
        Commands::Get { id } => {
            let task = producer_queue(&config, store).get_task(&id).await?;
            print_json(&task)
        }
        Commands::List => {
            let mut tasks = producer_queue(&config, store).list_tasks().await?;
            tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            print_json(&tasks)
        }
        Commands::Retry { id } => {
            let task = producer_queue(&config, store).retry_task(&id).await?;
            print_json(&task)
        }
        Commands::Stats => {
            let stats = producer_queue(&config, store).stats().await?;
            print_json(&stats)
        }
    }
}

async fn connect_store(config: &QueueConfig, in_memory: bool) -> anyhow::Result<SharedStore> {
    if in_memory {
        info!("Using in-memory task store");
        return Ok(Arc::new(InMemoryTaskStore::new()));
    }

    let store = RedisTaskStore::connect(&config.redis_url, config.redis_keys.clone())
        .await
        .context("Failed to connect to Redis")?;
    info!(tasks_key = %config.redis_keys.tasks, queue_key = %config.redis_keys.queue, "Connected to Redis");
    Ok(Arc::new(store))
}

/// Queue service for one-shot commands: events only, no webhook worker.
fn producer_queue(config: &QueueConfig, store: SharedStore) -> TaskQueue {
    let events = EventPublisher::new(Arc::clone(&store), config.events_topic.clone());
    TaskQueue::new(store, Notifier::events_only(events), config.worker_count)
        .with_queue_name(config.redis_keys.queue.clone())
}

fn webhook_client(mode: WebhookMode) -> anyhow::Result<Arc<dyn WebhookClient>> {
    Ok(match mode {
        WebhookMode::Log => Arc::new(LoggingWebhookClient),
        WebhookMode::Http => Arc::new(HttpWebhookClient::new()?),
    })
}

async fn run_serve_command(
    mut config: QueueConfig,
    store: SharedStore,
    args: ServeArgs,
) -> anyhow::Result<()> {
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(secs) = args.tick_secs {
        config.scheduler_tick = Duration::from_secs(secs);
    }
    config.validate()?;

    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    let (dispatcher, webhook_worker): (WebhookDispatcher, JoinHandle<()>) =
        WebhookDispatcher::spawn(webhook_client(config.webhook_mode)?, config.webhook_capacity);
    let events = EventPublisher::new(Arc::clone(&store), config.events_topic.clone());
    let queue = Arc::new(
        TaskQueue::new(
            Arc::clone(&store),
            Notifier::new(events, dispatcher),
            config.worker_count,
        )
        .with_queue_name(config.redis_keys.queue.clone()),
    );

    let mailer = Arc::new(SmtpMailer::new(config.smtp.clone()));
    let engine = Arc::new(
        ExecutionEngine::with_builtin_handlers(mailer, config.delays.clone())
            .with_unknown_type_policy(config.unknown_types),
    );

    let pool_config = WorkerPoolConfig::new(config.worker_count)
        .with_dequeue_backoff(config.dequeue_backoff)
        .with_shutdown_timeout(config.shutdown_timeout);
    let mut pool = WorkerPool::new(pool_config, Arc::clone(&queue), engine);

    let scheduler = Scheduler::new(Arc::clone(&store))
        .with_tick(config.scheduler_tick)
        .spawn(pool.subscribe_shutdown());
    pool.start()?;

    info!(
        workers = config.worker_count,
        tick_secs = config.scheduler_tick.as_secs(),
        webhook_mode = ?config.webhook_mode,
        "taskqueue serving, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    let shutdown = pool.shutdown().await;
    if let Err(e) = scheduler.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }

    let stats = pool.stats();
    info!(
        completed = stats.tasks_completed,
        retried = stats.tasks_retried,
        failed = stats.tasks_failed,
        success_rate = stats.success_rate(),
        "Worker pool statistics"
    );

    // Dropping the last dispatcher handle lets the webhook worker drain and exit.
    drop(pool);
    drop(queue);
    if tokio::time::timeout(WEBHOOK_DRAIN_TIMEOUT, webhook_worker)
        .await
        .is_err()
    {
        warn!("Timed out waiting for webhook deliveries");
    }

    info!(metrics = %export_metrics(), "Final metrics");
    shutdown?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
