//! The run orchestrator.
//!
//! [`QueueWorker::run`] launches `concurrency` batch processors at once,
//! waits for every one of them to settle, and folds their results into a
//! single [`RunResult`].

use crate::batch::BatchProcessor;
use crate::config::WorkerConfig;
use crate::error::{FailureStage, QueueError};
use crate::handler::MessageHandler;
use crate::metrics;
use crate::result::{MessageFailure, ResultBuilder, RunResult};
use crate::transport::QueueTransport;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

/// Queue worker that drains a queue in parallel batches.
///
/// The transport and handler are shared by every batch of every run. The
/// worker holds no other mutable state, so `run` may be called repeatedly.
///
/// # Example
///
/// ```rust,ignore
/// use queue_worker::{handler_fn, QueueWorker, SqsTransport, WorkerConfig};
///
/// let config = WorkerConfig::new("eu-west-1", queue_url)
///     .with_batch_size(10)
///     .with_concurrency(4);
/// let transport = SqsTransport::connect(&config.region, &config.queue_url).await;
/// let handler = handler_fn(|order: Order| async move { fulfil(order).await });
///
/// let worker = QueueWorker::new(transport, handler, config)?;
/// let result = worker.run().await;
/// ```
pub struct QueueWorker<T, H> {
    transport: Arc<T>,
    handler: Arc<H>,
    config: WorkerConfig,
}

impl<T, H> QueueWorker<T, H>
where
    T: QueueTransport + 'static,
    H: MessageHandler + 'static,
{
    /// Create a new queue worker.
    ///
    /// Fails with [`QueueError::Config`] if the configuration is invalid.
    pub fn new(transport: T, handler: H, config: WorkerConfig) -> Result<Self, QueueError> {
        Self::with_arc(Arc::new(transport), Arc::new(handler), config)
    }

    /// Create a new queue worker from shared transport and handler.
    pub fn with_arc(
        transport: Arc<T>,
        handler: Arc<H>,
        config: WorkerConfig,
    ) -> Result<Self, QueueError> {
        config.validate()?;

        Ok(Self {
            transport,
            handler,
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    fn batch_processor(&self) -> BatchProcessor<T, H> {
        BatchProcessor::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.handler),
            self.config.receive_options(),
            self.config.include_details,
            self.config.queue_url.as_str(),
        )
    }

    /// Run `concurrency` batches in parallel and aggregate their results.
    ///
    /// Never fails: receive errors and crashed batches are recorded in
    /// `errors` and the sibling batches carry on.
    #[instrument(
        skip_all,
        fields(
            queue = %self.config.queue_url,
            concurrency = self.config.concurrency,
            batch_size = self.config.batch_size,
        )
    )]
    pub async fn run(&self) -> RunResult<H::Output> {
        let mut result = ResultBuilder::start(self.config.include_details);
        let processor = self.batch_processor();

        let mut join_set = JoinSet::new();
        for _ in 0..self.config.concurrency {
            let processor = processor.clone();
            join_set.spawn(async move { processor.process().await });
        }

        // Completion order, not launch order
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(batch)) => result.merge(batch),
                Ok(Err(e)) => {
                    error!(error = %e, "Batch receive failed");
                    metrics::record_batch_failure(&self.config.queue_url, e.stage());
                    result.failure(MessageFailure::for_batch(e.stage(), &e));
                }
                Err(e) => {
                    error!(error = %e, "Batch task failed");
                    metrics::record_batch_failure(&self.config.queue_url, FailureStage::Worker);
                    result.failure(MessageFailure::for_batch(FailureStage::Worker, &e));
                }
            }
        }

        let message = self.summary(result.received_count(), result.failed_count());
        let run = result.finish(message);

        metrics::record_run(&self.config.queue_url, &run);
        info!(
            received = run.received,
            succeeded = run.succeeded,
            failed = run.failed,
            duration_ms = run.duration_ms,
            "{}",
            run.message
        );

        run
    }

    fn summary(&self, received: usize, failed: usize) -> String {
        let groups = format!(
            "in {} groups of {} messages",
            self.config.concurrency, self.config.batch_size
        );

        if received == 0 && failed == 0 {
            format!("The queue is empty: processed 0 messages {groups}")
        } else {
            format!("Processed {received} messages {groups}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HandlerError, TransportError};
    use crate::handler::handler_fn;
    use crate::message::Message;
    use crate::transport::{InMemoryQueue, MockQueueTransport, ReceiveOptions};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ok_handler() -> impl MessageHandler<Body = Value, Output = Value> {
        handler_fn(|_: Value| async move { Ok::<_, HandlerError>(json!({ "ok": true })) })
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = WorkerConfig::new("testRegion", "test").with_concurrency(0);
        let result = QueueWorker::new(MockQueueTransport::new(), ok_handler(), config);

        match result {
            Err(QueueError::Config(msg)) => assert!(msg.contains("concurrency")),
            _ => panic!("expected a configuration error"),
        }
    }

    #[tokio::test]
    async fn test_runs_one_batch_per_concurrency_slot() {
        let mut transport = MockQueueTransport::new();
        transport
            .expect_receive()
            .times(10)
            .returning(|options| {
                assert_eq!(options.max_messages, 5);
                Ok(vec![])
            });
        transport.expect_delete().never();

        let config = WorkerConfig::new("testRegion", "test")
            .with_batch_size(5)
            .with_concurrency(10);
        let worker = QueueWorker::new(transport, ok_handler(), config).unwrap();

        let result = worker.run().await;

        assert_eq!(result.batches, 10);
        assert!(result.responses().is_empty());
        assert!(result.errors().is_empty());
        assert_eq!(
            result.message,
            "The queue is empty: processed 0 messages in 10 groups of 5 messages"
        );
    }

    #[tokio::test]
    async fn test_receive_failure_does_not_abort_siblings() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut transport = MockQueueTransport::new();
        transport.expect_receive().times(3).returning(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(TransportError::receive("throttled")),
                n => Ok(vec![Message::new("{}", format!("h{n}"))]),
            }
        });
        transport.expect_delete().times(2).returning(|_| Ok(()));

        let config = WorkerConfig::new("r", "q").with_concurrency(3);
        let worker = QueueWorker::new(transport, ok_handler(), config).unwrap();

        let result = worker.run().await;

        assert_eq!(result.succeeded, 2);
        assert_eq!(result.responses().len(), 2);
        assert_eq!(result.failed, 1);
        let failure = &result.errors()[0];
        assert_eq!(failure.stage, FailureStage::Receive);
        assert!(failure.receipt_handle.is_none());
        assert!(failure.error.contains("throttled"));
        assert_eq!(result.message, "Processed 2 messages in 3 groups of 10 messages");
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_only_its_message() {
        let mut transport = MockQueueTransport::new();
        transport
            .expect_receive()
            .times(2)
            .returning(|_| Ok(vec![Message::new(r#"{"panic": true}"#, "h1")]));
        transport.expect_delete().never();

        let handler = handler_fn(|body: Value| async move {
            if body["panic"] == json!(true) {
                panic!("handler bug");
            }
            Ok::<_, HandlerError>(body)
        });

        let config = WorkerConfig::new("r", "q").with_concurrency(2);
        let worker = QueueWorker::new(transport, handler, config).unwrap();

        let result = worker.run().await;

        assert_eq!(result.received, 2);
        assert_eq!(result.failed, 2);
        assert!(result.errors().iter().all(|f| {
            f.stage == FailureStage::Handler && f.receipt_handle.as_deref() == Some("h1")
        }));
    }

    /// Panics on its first receive call
    struct CrashOnceTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueueTransport for CrashOnceTransport {
        async fn receive(&self, _: &ReceiveOptions) -> Result<Vec<Message>, TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("transport bug");
            }
            Ok(vec![Message::new("{}", "h1")])
        }

        async fn delete(&self, _: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_crashed_batch_becomes_worker_failure() {
        let transport = CrashOnceTransport {
            calls: AtomicUsize::new(0),
        };

        let config = WorkerConfig::new("r", "q").with_concurrency(2);
        let worker = QueueWorker::new(transport, ok_handler(), config).unwrap();

        let result = worker.run().await;

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        let failure = &result.errors()[0];
        assert_eq!(failure.stage, FailureStage::Worker);
        assert!(failure.receipt_handle.is_none());
    }

    #[tokio::test]
    async fn test_aggregates_all_batches() {
        let queue = Arc::new(InMemoryQueue::new("orders"));
        for n in 0..7 {
            queue.send_json(&json!({ "n": n })).unwrap();
        }
        queue.send("broken");

        let handler = handler_fn(|body: Value| async move {
            match body["n"].as_i64() {
                Some(3) => Err(HandlerError::new("three is unlucky")),
                Some(n) => Ok(n),
                None => Err(HandlerError::new("missing n")),
            }
        });

        let config = WorkerConfig::new("local", "orders")
            .with_batch_size(3)
            .with_concurrency(3)
            .with_wait_time(Duration::ZERO);
        let worker = QueueWorker::with_arc(queue.clone(), Arc::new(handler), config).unwrap();

        let result = worker.run().await;

        assert_eq!(result.batches, 3);
        assert_eq!(result.received, 8);
        assert_eq!(result.succeeded, 6);
        assert_eq!(result.failed, 2);
        assert_eq!(result.responses().len() + result.errors().len(), 8);

        let mut outputs = result.responses().to_vec();
        outputs.sort();
        assert_eq!(outputs, vec![0, 1, 2, 4, 5, 6]);

        // Failed messages stay on the queue, hidden until their visibility timeout
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.in_flight(), 2);
        assert_eq!(
            result.duration_ms,
            crate::result::millis_between(result.start, result.end)
        );
    }

    #[tokio::test]
    async fn test_without_details() {
        let queue = Arc::new(InMemoryQueue::new("orders"));
        queue.send("{}");

        let config = WorkerConfig::new("local", "orders")
            .with_include_details(false)
            .with_wait_time(Duration::ZERO);
        let worker = QueueWorker::with_arc(queue, Arc::new(ok_handler()), config).unwrap();

        let result = worker.run().await;

        assert!(result.responses.is_none());
        assert!(result.errors.is_none());
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.message, "Processed 1 messages in 1 groups of 10 messages");
    }
}
