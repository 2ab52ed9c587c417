//! Queue Drain Service
//!
//! Pulls messages from a queue in parallel batches, hands each one to a
//! handler and deletes it once handled.
//!
//! ## Architecture
//!
//! ```text
//! Queue (SQS | Redis stream | stdin -> in-memory)
//!   ↓ receive(batch_size) × concurrency
//! QueueWorker<Transport, LogHandler>
//!   ↓ delete on success
//! RunResult (JSON on stdout)
//! ```
//!
//! ## Modes
//!
//! - One-shot (default): a single run, result printed, process exits
//! - Continuous (`QUEUE_RUN_FOREVER=true`): runs back to back with
//!   `QUEUE_POLL_INTERVAL_MS` between them until SIGINT/SIGTERM

mod handler;

pub use handler::LogHandler;

use core_config::queue::{QueueBackend, QueueConfig};
use core_config::redis::RedisConfig;
use core_config::{env_parse_optional, Environment, FromEnv};
use eyre::{Result, WrapErr};
use queue_worker::{
    metrics, InMemoryQueue, QueueTransport, QueueWorker, RedisStreamTransport, RunResult,
    SqsTransport, WorkerConfig,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Map the environment configuration onto the worker's settings
pub fn worker_config(config: &QueueConfig) -> WorkerConfig {
    WorkerConfig::new(&config.region, &config.queue_url)
        .with_batch_size(config.batch_size)
        .with_concurrency(config.concurrency)
        .with_include_details(config.include_details)
        .with_wait_time(Duration::from_secs(config.wait_time_secs))
        .with_visibility_timeout(Duration::from_secs(config.visibility_timeout_secs))
}

/// Run the queue drain
///
/// This is the main entry point. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Loads the queue configuration from the environment
/// 3. Connects the selected transport
/// 4. Runs the worker once, or until a shutdown signal in continuous mode
///
/// # Errors
///
/// Returns an error if:
/// - The configuration is missing or invalid
/// - The transport cannot be set up
/// - `QUEUE_FAIL_ON_ERRORS` is set and a one-shot run recorded failures
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    let config = QueueConfig::from_env().wrap_err("Failed to load queue configuration")?;
    info!(
        backend = %config.backend,
        queue_url = %config.queue_url,
        region = %config.region,
        batch_size = config.batch_size,
        concurrency = config.concurrency,
        run_forever = config.run_forever,
        "Queue configuration loaded"
    );

    let metrics_port: Option<u16> =
        env_parse_optional("METRICS_PORT").wrap_err("Failed to load metrics configuration")?;
    if let Some(port) = metrics_port {
        metrics::init_metrics(Some(SocketAddr::from(([0, 0, 0, 0], port))))
            .wrap_err("Failed to start Prometheus exporter")?;
    }

    match config.backend {
        QueueBackend::Sqs => {
            let transport = SqsTransport::connect(&config.region, &config.queue_url).await;
            drain(transport, &config).await
        }
        QueueBackend::Redis => {
            let redis_config =
                RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

            info!("Connecting to Redis...");
            let client =
                redis::Client::open(redis_config.uri.as_str()).wrap_err("Invalid Redis URL")?;
            // One blocking-read connection per concurrent batch
            let transport = RedisStreamTransport::connect(
                client,
                &config.queue_url,
                &config.consumer_group,
                config.concurrency,
            )
            .await
            .wrap_err("Failed to connect to Redis")?;
            info!("Connected to Redis successfully");

            transport
                .init_consumer_group()
                .await
                .wrap_err("Failed to create consumer group")?;
            drain(transport, &config).await
        }
        QueueBackend::Memory => {
            let queue = InMemoryQueue::new(&config.queue_url);
            let loaded = load_stdin(&queue).await?;
            info!(count = loaded, "Loaded messages from stdin");
            drain(queue, &config).await
        }
    }
}

async fn drain<T>(transport: T, config: &QueueConfig) -> Result<()>
where
    T: QueueTransport + 'static,
{
    let worker = QueueWorker::new(transport, LogHandler, worker_config(config))
        .wrap_err("Invalid worker configuration")?;

    if !config.run_forever {
        let result = worker.run().await;
        print_result(&result, true)?;

        if config.fail_on_errors && result.has_failures() {
            eyre::bail!("{} message(s) failed: {}", result.failed, result.message);
        }
        return Ok(());
    }

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    info!(poll_interval_ms = config.poll_interval_ms, "Running until shutdown");

    loop {
        if *shutdown_rx.borrow() {
            info!("Received shutdown signal, stopping");
            break;
        }

        // A run always completes; shutdown is only checked between runs
        let result = worker.run().await;
        print_result(&result, false)?;

        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    info!("Queue drain stopped");
    Ok(())
}

fn print_result(result: &RunResult<Value>, pretty: bool) -> Result<()> {
    if result.has_failures() {
        warn!(failed = result.failed, "Run finished with failures");
    }

    let json = if pretty {
        serde_json::to_string_pretty(result)
    } else {
        serde_json::to_string(result)
    }
    .wrap_err("Failed to serialize run result")?;

    println!("{json}");
    Ok(())
}

/// Enqueue every non-empty stdin line as one message
async fn load_stdin(queue: &InMemoryQueue) -> Result<usize> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut count = 0;

    while let Some(line) = lines.next_line().await.wrap_err("Failed to read stdin")? {
        let line = line.trim();
        if !line.is_empty() {
            queue.send(line);
            count += 1;
        }
    }

    Ok(count)
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;

        tokio::select! {
            res = signal::ctrl_c() => {
                res.wrap_err("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, initiating shutdown...");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
