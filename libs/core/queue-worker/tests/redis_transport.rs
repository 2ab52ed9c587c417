//! Redis Streams transport against a real Redis (testcontainers).
//!
//! Run with `--ignored`; these tests start a Docker container.

use queue_worker::{
    handler_fn, FailureStage, HandlerError, QueueTransport, QueueWorker, ReceiveOptions,
    RedisStreamTransport, WorkerConfig, DEFAULT_VISIBILITY_TIMEOUT, DEFAULT_WAIT_TIME,
};
use serde_json::{json, Value};
use std::time::Duration;
use test_utils::{TestDataBuilder, TestRedis};

fn options(max_messages: usize, visibility_timeout: Duration) -> ReceiveOptions {
    ReceiveOptions {
        max_messages,
        wait_time: Duration::from_millis(100),
        visibility_timeout,
    }
}

async fn transport(redis: &TestRedis, test_name: &str) -> RedisStreamTransport {
    let names = TestDataBuilder::from_test_name(test_name);
    let transport = RedisStreamTransport::new(
        redis.connection_manager().await,
        names.name("stream", "jobs"),
        names.name("group", "workers"),
    );
    transport.init_consumer_group().await.unwrap();
    transport
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_receive_and_delete() {
    let redis = TestRedis::new().await;
    let transport = transport(&redis, "test_receive_and_delete").await;

    transport.send(r#"{"n": 1}"#).await.unwrap();
    transport.send(r#"{"n": 2}"#).await.unwrap();

    let batch = transport
        .receive(&options(10, Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].body, r#"{"n": 1}"#);

    for message in &batch {
        transport.delete(&message.receipt_handle).await.unwrap();
    }

    // Acked entries cannot be acked again
    assert!(transport.delete(&batch[0].receipt_handle).await.is_err());

    let empty = transport
        .receive(&options(10, Duration::from_secs(30)))
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_unacked_message_is_redelivered() {
    let redis = TestRedis::new().await;
    let transport = transport(&redis, "test_unacked_message_is_redelivered").await;

    transport.send("{}").await.unwrap();

    let short = options(10, Duration::from_millis(200));
    let first = transport.receive(&short).await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let second = transport.receive(&short).await.unwrap();
    assert_eq!(second.len(), 1);
    assert!(second[0].is_redelivery());
    assert_eq!(second[0].receipt_handle, first[0].receipt_handle);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_worker_run_over_redis() {
    let redis = TestRedis::new().await;
    let transport = transport(&redis, "test_worker_run_over_redis").await;

    for n in 0..5 {
        transport.send(&json!({ "n": n }).to_string()).await.unwrap();
    }

    let handler = handler_fn(|body: Value| async move {
        match body["n"].as_i64() {
            Some(4) => Err(HandlerError::new("rejected")),
            Some(n) => Ok(n),
            None => Err(HandlerError::new("missing n")),
        }
    });

    let config = WorkerConfig::new("local", transport.stream_name())
        .with_batch_size(2)
        .with_concurrency(3)
        .with_wait_time(Duration::from_millis(100));
    let worker = QueueWorker::new(transport, handler, config).unwrap();

    let result = worker.run().await;

    assert_eq!(result.received, 5);
    assert_eq!(result.succeeded, 4);
    assert_eq!(result.errors().len(), 1);
    assert_eq!(result.errors()[0].stage, FailureStage::Handler);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_idle_stream_with_default_wait_is_empty() {
    let redis = TestRedis::new().await;
    let names = TestDataBuilder::from_test_name("test_idle_stream_with_default_wait_is_empty");
    let transport = RedisStreamTransport::connect(
        redis.client(),
        names.name("stream", "jobs"),
        names.name("group", "workers"),
        2,
    )
    .await
    .unwrap();
    transport.init_consumer_group().await.unwrap();

    let config = WorkerConfig::new("local", transport.stream_name())
        .with_concurrency(2)
        .with_wait_time(DEFAULT_WAIT_TIME)
        .with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT);
    let handler = handler_fn(|body: Value| async move { Ok::<_, HandlerError>(body) });
    let worker = QueueWorker::new(transport, handler, config).unwrap();

    let result = worker.run().await;

    assert!(!result.has_failures(), "errors: {:?}", result.errors());
    assert_eq!(
        result.message,
        "The queue is empty: processed 0 messages in 2 groups of 10 messages"
    );
}
