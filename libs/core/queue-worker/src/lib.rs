//! Queue Worker
//!
//! Drains a message queue in parallel batches and reports what happened.
//!
//! ## How a run works
//!
//! ```text
//! QueueWorker::run
//!   ├─ BatchProcessor ── receive(batch_size) ─┬─ decode → handle → delete
//!   ├─ BatchProcessor ── receive(batch_size) ─┼─ decode → handle → delete
//!   └─ ... (concurrency)                      └─ ...
//!        ↓ settle all
//!   RunResult { responses, errors, timing }
//! ```
//!
//! - A message is deleted only after its handler succeeded
//! - Failed messages stay on the queue and come back after the visibility timeout
//! - Nothing is retried by the worker itself
//! - Batch failures never abort sibling batches; they show up in `errors`
//!
//! ## Transports
//!
//! - [`SqsTransport`] (feature `sqs`): Amazon SQS
//! - [`RedisStreamTransport`]: Redis Streams consumer group
//! - [`InMemoryQueue`]: in-process queue for local runs and tests
//!
//! ## Example
//!
//! ```ignore
//! use queue_worker::{handler_fn, InMemoryQueue, QueueWorker, WorkerConfig};
//!
//! let queue = InMemoryQueue::new("orders");
//! queue.send(r#"{"id": 1}"#);
//!
//! let handler = handler_fn(|order: serde_json::Value| async move { Ok(order["id"].clone()) });
//! let worker = QueueWorker::new(queue, handler, WorkerConfig::new("local", "orders"))?;
//!
//! let result = worker.run().await;
//! assert_eq!(result.succeeded, 1);
//! ```

mod batch;
mod config;
mod error;
mod handler;
mod message;
pub mod metrics;
mod result;
mod transport;
mod worker;

pub use batch::{BatchProcessor, EMPTY_QUEUE_MESSAGE};
pub use config::{
    WorkerConfig, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, DEFAULT_VISIBILITY_TIMEOUT,
    DEFAULT_WAIT_TIME,
};
pub use error::{FailureStage, HandlerError, QueueError, TransportError, TransportOp};
pub use handler::{handler_fn, FnHandler, MessageHandler};
pub use message::Message;
pub use result::{millis_between, BatchResult, MessageFailure, RunResult, WorkResult};
#[cfg(feature = "sqs")]
pub use transport::SqsTransport;
pub use transport::{InMemoryQueue, QueueTransport, ReceiveOptions, RedisStreamTransport};
pub use worker::QueueWorker;
