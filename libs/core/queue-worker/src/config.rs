//! Worker configuration
//!
//! This module provides `WorkerConfig`, the immutable settings bound to a
//! [`QueueWorker`](crate::QueueWorker) at construction.

use crate::error::QueueError;
use crate::transport::ReceiveOptions;
use std::time::Duration;

/// Default number of messages fetched per receive call
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default number of batches processed in parallel per run
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Default long-poll wait for a receive call
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(1);

/// Default window a received message stays hidden from other consumers
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the queue worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Region or target identity of the queue service
    pub region: String,

    /// Queue identity (SQS queue URL, Redis stream key, ...)
    pub queue_url: String,

    /// Maximum messages fetched per receive call
    pub batch_size: usize,

    /// Number of batches processed in parallel per run
    pub concurrency: usize,

    /// Keep per-message responses and errors in results
    pub include_details: bool,

    /// Long-poll wait for each receive call
    pub wait_time: Duration,

    /// How long a received message stays invisible before redelivery
    pub visibility_timeout: Duration,
}

impl WorkerConfig {
    /// Create a new WorkerConfig with default batching
    pub fn new(region: impl Into<String>, queue_url: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            queue_url: queue_url.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            include_details: true,
            wait_time: DEFAULT_WAIT_TIME,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the number of parallel batches
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Keep or drop per-message responses and errors
    pub fn with_include_details(mut self, include: bool) -> Self {
        self.include_details = include;
        self
    }

    /// Set the receive long-poll wait
    pub fn with_wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = wait;
        self
    }

    /// Set the visibility timeout
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Check the invariants a run depends on
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.queue_url.trim().is_empty() {
            return Err(QueueError::Config("queue_url must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(QueueError::Config("batch_size must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(QueueError::Config("concurrency must be at least 1".into()));
        }
        Ok(())
    }

    /// Parameters for one receive call
    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.batch_size,
            wait_time: self.wait_time,
            visibility_timeout: self.visibility_timeout,
        }
    }
}
