//! Redis Streams transport
//!
//! Maps queue semantics onto a stream consumer group:
//! - receive: reclaim entries idle longer than the visibility timeout
//!   (`XAUTOCLAIM`), then read new entries (`XREADGROUP ... >`)
//! - delete: `XACK` + `XDEL` of the entry ID, which doubles as the receipt handle
//!
//! Entries carry their payload in the `body` field.
//!
//! `XREADGROUP ... BLOCK` holds its reply for up to the receive wait time, so
//! connections must not time out responses earlier (see [`connection_config`]).
//! Each concurrent batch reads through its own connection; blocking reads on a
//! shared multiplexed connection would queue behind each other.

use super::{QueueTransport, ReceiveOptions};
use crate::error::TransportError;
use crate::message::Message;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use redis::RedisResult;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stream field holding the message payload
pub const BODY_FIELD: &str = "body";

/// Connection manager settings for stream consumers: no client-side
/// response timeout, so a blocking read can run for the full wait time.
pub fn connection_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new().set_response_timeout(None)
}

/// Redis Streams backed queue transport
#[derive(Clone)]
pub struct RedisStreamTransport {
    redis: ConnectionManager,
    /// Connections used for blocking reads, picked round-robin
    readers: Arc<[ConnectionManager]>,
    next_reader: Arc<AtomicUsize>,
    stream_name: String,
    consumer_group: String,
    consumer_id: String,
}

impl RedisStreamTransport {
    /// Create a transport reading `stream_name` through `consumer_group`.
    ///
    /// All commands share `redis`. Its response timeout must be longer than
    /// the receive wait time; build it with [`connection_config`].
    pub fn new(
        redis: ConnectionManager,
        stream_name: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            readers: Arc::from(vec![redis.clone()]),
            next_reader: Arc::new(AtomicUsize::new(0)),
            redis,
            stream_name: stream_name.into(),
            consumer_group: consumer_group.into(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    /// Connect to Redis with one blocking-read connection per concurrent batch.
    ///
    /// Every connection is built with [`connection_config`] and the command
    /// connection is checked with PING.
    pub async fn connect(
        client: redis::Client,
        stream_name: impl Into<String>,
        consumer_group: impl Into<String>,
        readers: usize,
    ) -> RedisResult<Self> {
        let redis = ConnectionManager::new_with_config(client.clone(), connection_config()).await?;

        let mut conn = redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        let mut pool = Vec::with_capacity(readers.max(1));
        for _ in 0..readers.max(1) {
            let reader = ConnectionManager::new_with_config(client.clone(), connection_config());
            pool.push(reader.await?);
        }

        Ok(Self::new(redis, stream_name, consumer_group).with_readers(pool))
    }

    /// Use dedicated connections for blocking reads
    pub fn with_readers(mut self, readers: Vec<ConnectionManager>) -> Self {
        if !readers.is_empty() {
            self.readers = Arc::from(readers);
        }
        self
    }

    /// Set the consumer ID
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Create the consumer group (and the stream) if it doesn't exist
    pub async fn init_consumer_group(&self) -> RedisResult<()> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_name)
            .arg(&self.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.stream_name,
                    group = %self.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.stream_name,
                    group = %self.consumer_group,
                    "Consumer group already exists"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Append a raw body to the stream and return the entry ID
    pub async fn send(&self, body: &str) -> RedisResult<String> {
        let mut conn = self.redis.clone();

        redis::cmd("XADD")
            .arg(&self.stream_name)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await
    }

    /// Reclaim entries whose visibility timeout has lapsed
    async fn claim_expired(&self, options: &ReceiveOptions) -> RedisResult<Vec<Message>> {
        let mut conn = self.redis.clone();

        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream_name)
            .arg(&self.consumer_group)
            .arg(&self.consumer_id)
            .arg(options.visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(options.max_messages)
            .query_async(&mut conn)
            .await?;

        if !reply.claimed.is_empty() {
            warn!(
                stream = %self.stream_name,
                count = reply.claimed.len(),
                "Reclaimed messages past their visibility timeout"
            );
        }

        // The delivery counter isn't part of the XAUTOCLAIM reply; these are
        // at least on their second delivery.
        Ok(reply
            .claimed
            .iter()
            .map(|entry| to_message(entry).with_receive_count(2))
            .collect())
    }

    fn reader(&self) -> ConnectionManager {
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[index].clone()
    }

    /// Read never-delivered entries
    async fn read_new(&self, count: usize, block: Option<u64>) -> RedisResult<Vec<Message>> {
        let mut conn = self.reader();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.consumer_group)
            .arg(&self.consumer_id);

        if let Some(timeout) = block {
            cmd.arg("BLOCK").arg(timeout);
        }

        cmd.arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.stream_name)
            .arg(">");

        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .iter()
                    .flat_map(|key| key.ids.iter().map(to_message))
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn to_message(entry: &StreamId) -> Message {
    let body = entry.get::<String>(BODY_FIELD).unwrap_or_else(|| {
        warn!(stream_id = %entry.id, "Missing 'body' field in stream entry");
        String::new()
    });

    Message::new(body, entry.id.clone()).with_message_id(entry.id.clone())
}

fn is_nogroup(e: &redis::RedisError) -> bool {
    e.to_string().contains("NOGROUP")
}

#[async_trait]
impl QueueTransport for RedisStreamTransport {
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<Message>, TransportError> {
        let mut messages = match self.claim_expired(options).await {
            Ok(claimed) => claimed,
            Err(e) if is_nogroup(&e) => {
                warn!(stream = %self.stream_name, "Consumer group missing, recreating...");
                self.init_consumer_group()
                    .await
                    .map_err(|e| TransportError::receive(e.to_string()))?;
                Vec::new()
            }
            Err(e) => return Err(TransportError::receive(e.to_string())),
        };

        let remaining = options.max_messages.saturating_sub(messages.len());
        if remaining == 0 {
            return Ok(messages);
        }

        // Only wait for new entries when nothing was reclaimed; BLOCK 0 would wait forever
        let wait_ms = options.wait_time.as_millis() as u64;
        let block = (messages.is_empty() && wait_ms > 0).then_some(wait_ms);

        let fresh = self
            .read_new(remaining, block)
            .await
            .map_err(|e| TransportError::receive(e.to_string()))?;
        messages.extend(fresh);

        debug!(stream = %self.stream_name, count = messages.len(), "Received messages");
        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError> {
        let mut conn = self.redis.clone();

        let acked: i64 = redis::cmd("XACK")
            .arg(&self.stream_name)
            .arg(&self.consumer_group)
            .arg(receipt_handle)
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::delete(e.to_string()))?;

        if acked == 0 {
            return Err(TransportError::delete(format!(
                "entry {receipt_handle} is not pending in group {}",
                self.consumer_group
            )));
        }

        let _: i64 = redis::cmd("XDEL")
            .arg(&self.stream_name)
            .arg(receipt_handle)
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::delete(e.to_string()))?;

        debug!(stream_id = %receipt_handle, "Acknowledged and deleted message");
        Ok(())
    }
}
