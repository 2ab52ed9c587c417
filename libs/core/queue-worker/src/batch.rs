//! Single-batch processing
//!
//! A [`BatchProcessor`] issues exactly one receive call and processes every
//! returned message concurrently. Each message goes through
//! decode -> handle -> delete in that order; a failure at any step stops that
//! message only and leaves it on the queue.

use crate::error::{HandlerError, QueueError};
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::metrics::{self, MessageOutcome};
use crate::result::{BatchResult, MessageFailure, ResultBuilder};
use crate::transport::{QueueTransport, ReceiveOptions};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Summary used when a receive call returns nothing
pub const EMPTY_QUEUE_MESSAGE: &str = "The queue is empty";

/// Processes one receive call's worth of messages
pub struct BatchProcessor<T, H> {
    transport: Arc<T>,
    handler: Arc<H>,
    options: ReceiveOptions,
    include_details: bool,
    queue: Arc<str>,
}

impl<T, H> Clone for BatchProcessor<T, H> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            handler: Arc::clone(&self.handler),
            options: self.options,
            include_details: self.include_details,
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T, H> BatchProcessor<T, H>
where
    T: QueueTransport,
    H: MessageHandler,
{
    pub fn new(
        transport: Arc<T>,
        handler: Arc<H>,
        options: ReceiveOptions,
        include_details: bool,
        queue: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            transport,
            handler,
            options,
            include_details,
            queue: queue.into(),
        }
    }

    /// Receive one batch and process it.
    ///
    /// A failed receive call is returned as an error; everything that goes
    /// wrong after that is recorded in the result.
    #[instrument(skip_all, fields(queue = %self.queue, max_messages = self.options.max_messages))]
    pub async fn process(&self) -> Result<BatchResult<H::Output>, QueueError> {
        let mut result = ResultBuilder::start(self.include_details);

        let messages = self.transport.receive(&self.options).await?;
        result.received(messages.len());
        metrics::record_batch_size(&self.queue, messages.len());

        if messages.is_empty() {
            debug!("Queue is empty");
            return Ok(result.finish(EMPTY_QUEUE_MESSAGE));
        }

        let count = messages.len();
        let outcomes = join_all(messages.iter().map(|m| self.process_guarded(m))).await;

        for outcome in outcomes {
            match outcome {
                Ok(output) => result.success(output),
                Err(failure) => result.failure(failure),
            }
        }

        Ok(result.finish(format!("Processed batch of {count} messages")))
    }

    /// Process one message, turning a panic into a handler failure for that
    /// message so its siblings' outcomes are kept.
    async fn process_guarded(&self, message: &Message) -> Result<H::Output, MessageFailure> {
        match AssertUnwindSafe(self.process_message(message))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let error = QueueError::Handler(HandlerError::new(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                )));
                let failure = MessageFailure::for_message(message, &error);
                warn!(message = %message.label(), error = %error, "Message processing panicked");
                metrics::record_message(&self.queue, MessageOutcome::HandlerFailed);
                Err(failure)
            }
        }
    }

    /// Decode, handle, then delete a single message.
    ///
    /// Delete is only issued after the handler returned successfully.
    async fn process_message(&self, message: &Message) -> Result<H::Output, MessageFailure> {
        let fail = |error: QueueError| {
            let failure = MessageFailure::for_message(message, &error);
            warn!(
                message = %message.label(),
                stage = %failure.stage,
                receive_count = message.receive_count,
                error = %error,
                "Message processing failed"
            );
            if let Some(outcome) = MessageOutcome::for_stage(failure.stage) {
                metrics::record_message(&self.queue, outcome);
            }
            failure
        };

        let body: H::Body = message.decode().map_err(&fail)?;

        debug!(
            message = %message.label(),
            handler = self.handler.name(),
            redelivery = message.is_redelivery(),
            "Handling message"
        );
        let output = self
            .handler
            .handle(body)
            .await
            .map_err(|e| fail(QueueError::Handler(e)))?;

        self.transport
            .delete(&message.receipt_handle)
            .await
            .map_err(|e| fail(QueueError::Transport(e)))?;

        metrics::record_message(&self.queue, MessageOutcome::Success);
        Ok(output)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureStage, HandlerError, TransportError};
    use crate::handler::handler_fn;
    use crate::transport::{InMemoryQueue, MockQueueTransport};
    use mockall::predicate::eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn options(max_messages: usize) -> ReceiveOptions {
        ReceiveOptions {
            max_messages,
            wait_time: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(30),
        }
    }

    fn ok_handler() -> impl MessageHandler<Body = Value, Output = Value> {
        handler_fn(|_: Value| async move { Ok::<_, HandlerError>(json!({ "ok": true })) })
    }

    fn processor<T: QueueTransport, H: MessageHandler>(
        transport: T,
        handler: H,
        include_details: bool,
    ) -> BatchProcessor<T, H> {
        BatchProcessor::new(
            Arc::new(transport),
            Arc::new(handler),
            options(10),
            include_details,
            "test",
        )
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let mut transport = MockQueueTransport::new();
        transport
            .expect_receive()
            .times(1)
            .returning(|_| Ok(vec![]));
        transport.expect_delete().never();

        let result = processor(transport, ok_handler(), true).process().await.unwrap();

        assert_eq!(result.message, "The queue is empty");
        assert_eq!(result.received, 0);
        assert!(result.responses().is_empty());
        assert!(result.errors().is_empty());
        assert!(result.end >= result.start);
    }

    #[tokio::test]
    async fn test_receive_uses_options() {
        let mut transport = MockQueueTransport::new();
        transport
            .expect_receive()
            .with(eq(options(10)))
            .times(1)
            .returning(|_| Ok(vec![]));

        processor(transport, ok_handler(), true).process().await.unwrap();
    }

    #[tokio::test]
    async fn test_all_messages_succeed() {
        let mut transport = MockQueueTransport::new();
        transport.expect_receive().times(1).returning(|_| {
            Ok(vec![
                Message::new(r#"{"a": 1}"#, "h1"),
                Message::new(r#"{"b": 2}"#, "h2"),
            ])
        });
        transport
            .expect_delete()
            .with(eq("h1"))
            .times(1)
            .returning(|_| Ok(()));
        transport
            .expect_delete()
            .with(eq("h2"))
            .times(1)
            .returning(|_| Ok(()));

        let result = processor(transport, ok_handler(), true).process().await.unwrap();

        assert_eq!(result.message, "Processed batch of 2 messages");
        assert_eq!(
            result.responses(),
            &[json!({ "ok": true }), json!({ "ok": true })]
        );
        assert!(result.errors().is_empty());
        assert_eq!(result.succeeded, 2);
    }

    #[tokio::test]
    async fn test_handler_failure_is_not_deleted() {
        let mut transport = MockQueueTransport::new();
        transport.expect_receive().times(1).returning(|_| {
            Ok(vec![
                Message::new(r#"{"fail": true}"#, "h1"),
                Message::new(r#"{"fail": false}"#, "h2"),
            ])
        });
        transport.expect_delete().with(eq("h1")).never();
        transport
            .expect_delete()
            .with(eq("h2"))
            .times(1)
            .returning(|_| Ok(()));

        let handler = handler_fn(|body: Value| async move {
            if body["fail"] == json!(true) {
                Err(HandlerError::new("cannot process"))
            } else {
                Ok(body)
            }
        });

        let result = processor(transport, handler, true).process().await.unwrap();

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        let failure = &result.errors()[0];
        assert_eq!(failure.stage, FailureStage::Handler);
        assert_eq!(failure.receipt_handle.as_deref(), Some("h1"));
        assert!(failure.error.contains("cannot process"));
    }

    #[tokio::test]
    async fn test_decode_failure_skips_handler_and_delete() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = handler_fn(move |_: Value| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(())
            }
        });

        let mut transport = MockQueueTransport::new();
        transport.expect_receive().times(1).returning(|_| {
            Ok(vec![
                Message::new("not json", "bad"),
                Message::new("{}", "good"),
            ])
        });
        transport.expect_delete().with(eq("bad")).never();
        transport
            .expect_delete()
            .with(eq("good"))
            .times(1)
            .returning(|_| Ok(()));

        let result = processor(transport, handler, true).process().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.errors()[0].stage, FailureStage::Decode);
        assert_eq!(result.errors()[0].receipt_handle.as_deref(), Some("bad"));
    }

    #[tokio::test]
    async fn test_delete_failure_is_recorded() {
        let mut transport = MockQueueTransport::new();
        transport
            .expect_receive()
            .times(1)
            .returning(|_| Ok(vec![Message::new("{}", "h1").with_message_id("m-1")]));
        transport
            .expect_delete()
            .with(eq("h1"))
            .times(1)
            .returning(|_| Err(TransportError::delete("access denied")));

        let result = processor(transport, ok_handler(), true).process().await.unwrap();

        assert_eq!(result.succeeded, 0);
        let failure = &result.errors()[0];
        assert_eq!(failure.stage, FailureStage::Delete);
        assert_eq!(failure.message_id.as_deref(), Some("m-1"));
        assert!(failure.error.contains("access denied"));
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_sibling_outcomes() {
        let mut transport = MockQueueTransport::new();
        transport.expect_receive().times(1).returning(|_| {
            Ok(vec![
                Message::new(r#"{"n": 1}"#, "h1"),
                Message::new(r#"{"panic": true}"#, "h3").with_message_id("m-3"),
                Message::new(r#"{"n": 2}"#, "h2"),
            ])
        });
        transport
            .expect_delete()
            .with(eq("h1"))
            .times(1)
            .returning(|_| Ok(()));
        transport
            .expect_delete()
            .with(eq("h2"))
            .times(1)
            .returning(|_| Ok(()));
        transport.expect_delete().with(eq("h3")).never();

        let handler = handler_fn(|body: Value| async move {
            if body["panic"] == json!(true) {
                tokio::time::sleep(Duration::from_millis(20)).await;
                panic!("boom");
            }
            Ok::<_, HandlerError>(body["n"].as_i64().unwrap_or_default())
        });

        let result = processor(transport, handler, true).process().await.unwrap();

        assert_eq!(result.received, 3);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.responses(), &[1, 2]);

        let failure = &result.errors()[0];
        assert_eq!(failure.stage, FailureStage::Handler);
        assert_eq!(failure.message_id.as_deref(), Some("m-3"));
        assert_eq!(failure.receipt_handle.as_deref(), Some("h3"));
        assert!(failure.error.contains("handler panicked: boom"));
    }

    #[tokio::test]
    async fn test_receive_failure_is_returned() {
        let mut transport = MockQueueTransport::new();
        transport
            .expect_receive()
            .times(1)
            .returning(|_| Err(TransportError::receive("connection refused")));

        let err = processor(transport, ok_handler(), true)
            .process()
            .await
            .unwrap_err();

        assert_eq!(err.stage(), FailureStage::Receive);
    }

    #[tokio::test]
    async fn test_without_details_only_counts() {
        let mut transport = MockQueueTransport::new();
        transport.expect_receive().times(1).returning(|_| {
            Ok(vec![Message::new("{}", "h1"), Message::new("oops", "h2")])
        });
        transport.expect_delete().times(1).returning(|_| Ok(()));

        let result = processor(transport, ok_handler(), false).process().await.unwrap();

        assert!(result.responses.is_none());
        assert!(result.errors.is_none());
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn test_delete_happens_after_handler() {
        let queue = Arc::new(InMemoryQueue::new("ordering"));
        queue.send("{}");

        let observer = queue.clone();
        let handler = handler_fn(move |_: Value| {
            let observer = observer.clone();
            async move {
                // Still on the queue while the handler runs
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, HandlerError>(observer.len())
            }
        });

        let processor = BatchProcessor::new(
            queue.clone(),
            Arc::new(handler),
            options(10),
            true,
            "ordering",
        );
        let result = processor.process().await.unwrap();

        assert_eq!(result.responses(), &[1]);
        assert!(queue.is_empty());
    }
}
