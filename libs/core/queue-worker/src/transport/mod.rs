//! Queue transports
//!
//! A transport is the network client for one queue: it receives batches and
//! deletes individual deliveries. The worker only ever talks to the
//! [`QueueTransport`] trait; concrete backends live in the submodules.

mod memory;
mod redis_stream;
#[cfg(feature = "sqs")]
mod sqs;

pub use memory::InMemoryQueue;
pub use redis_stream::RedisStreamTransport;
#[cfg(feature = "sqs")]
pub use sqs::SqsTransport;

use crate::error::TransportError;
use crate::message::Message;
use async_trait::async_trait;
use std::time::Duration;

/// Parameters for a single receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Upper bound on the number of messages returned
    pub max_messages: usize,

    /// How long the call may wait for messages to arrive
    pub wait_time: Duration,

    /// How long returned messages stay hidden from other consumers
    pub visibility_timeout: Duration,
}

/// Receive/delete client for a remote queue.
///
/// Implementations are shared by every batch in a run, so both calls take
/// `&self` and must be safe to issue concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Receive up to `options.max_messages` messages.
    ///
    /// An empty vector means the queue had nothing visible within the wait time.
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<Message>, TransportError>;

    /// Delete one delivery by its receipt handle.
    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError>;
}
