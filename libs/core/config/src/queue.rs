use crate::{env_flag, env_or_default, env_parse, env_required, ConfigError, FromEnv};
use strum::{Display, EnumString};

/// Which queue service the worker talks to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QueueBackend {
    Sqs,
    Redis,
    Memory,
}

/// Queue worker configuration
#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// SQS queue URL, or stream key / queue name for the other backends
    pub queue_url: String,
    pub region: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub include_details: bool,
    pub wait_time_secs: u64,
    pub visibility_timeout_secs: u64,
    /// Consumer group (Redis backend only)
    pub consumer_group: String,
    /// Pause between runs when running continuously
    pub poll_interval_ms: u64,
    /// Keep running until a shutdown signal instead of a single run
    pub run_forever: bool,
    /// Exit with an error when a one-shot run recorded failures
    pub fail_on_errors: bool,
}

impl FromEnv for QueueConfig {
    /// Reads from environment variables:
    /// - QUEUE_URL: required
    /// - QUEUE_BACKEND: sqs | redis | memory (default: sqs)
    /// - AWS_REGION: defaults to us-east-1
    /// - QUEUE_BATCH_SIZE (10), QUEUE_CONCURRENCY (1), QUEUE_INCLUDE_DETAILS (true)
    /// - QUEUE_WAIT_TIME_SECS (1), QUEUE_VISIBILITY_TIMEOUT_SECS (30)
    /// - QUEUE_CONSUMER_GROUP (queue-workers), QUEUE_POLL_INTERVAL_MS (1000)
    /// - QUEUE_RUN_FOREVER (false), QUEUE_FAIL_ON_ERRORS (false)
    fn from_env() -> Result<Self, ConfigError> {
        let backend = env_parse("QUEUE_BACKEND", QueueBackend::Sqs)?;

        Ok(Self {
            backend,
            queue_url: env_required("QUEUE_URL")?,
            region: env_or_default("AWS_REGION", "us-east-1"),
            batch_size: env_parse("QUEUE_BATCH_SIZE", 10)?,
            concurrency: env_parse("QUEUE_CONCURRENCY", 1)?,
            include_details: env_flag("QUEUE_INCLUDE_DETAILS", true)?,
            wait_time_secs: env_parse("QUEUE_WAIT_TIME_SECS", 1)?,
            visibility_timeout_secs: env_parse("QUEUE_VISIBILITY_TIMEOUT_SECS", 30)?,
            consumer_group: env_or_default("QUEUE_CONSUMER_GROUP", "queue-workers"),
            poll_interval_ms: env_parse("QUEUE_POLL_INTERVAL_MS", 1000)?,
            run_forever: env_flag("QUEUE_RUN_FOREVER", false)?,
            fail_on_errors: env_flag("QUEUE_FAIL_ON_ERRORS", false)?,
        })
    }
}
