//! Amazon SQS transport

use super::{QueueTransport, ReceiveOptions};
use crate::error::TransportError;
use crate::message::Message;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{Message as SqsMessage, MessageSystemAttributeName};
use aws_sdk_sqs::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// https://docs.aws.amazon.com/AWSSimpleQueueService/latest/APIReference/API_ReceiveMessage.html
const MAX_RECEIVE_BATCH: usize = 10;
const MAX_WAIT_SECS: u64 = 20;

/// SQS queue transport
#[derive(Clone, Debug)]
pub struct SqsTransport {
    client: Client,
    queue_url: String,
}

impl SqsTransport {
    /// Wrap an existing SQS client
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Build a client for `region`, using the queue URL as the service endpoint.
    ///
    /// Credentials come from the standard AWS environment chain.
    pub async fn connect(region: impl Into<String>, queue_url: impl Into<String>) -> Self {
        let queue_url = queue_url.into();

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.into()))
            .endpoint_url(&queue_url)
            .load()
            .await;

        Self::new(Client::new(&shared), queue_url)
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

fn whole_secs(duration: Duration, max: u64) -> i32 {
    duration.as_secs().min(max) as i32
}

fn to_message(message: SqsMessage) -> Message {
    // ApproximateReceiveCount is requested on every receive; 1 if SQS omits it
    let receive_count = message
        .attributes
        .as_ref()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);

    Message {
        message_id: message.message_id,
        body: message.body.unwrap_or_default(),
        receipt_handle: message.receipt_handle.unwrap_or_default(),
        receive_count,
    }
}

#[async_trait]
impl QueueTransport for SqsTransport {
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<Message>, TransportError> {
        let max_messages = if options.max_messages > MAX_RECEIVE_BATCH {
            warn!(
                requested = options.max_messages,
                limit = MAX_RECEIVE_BATCH,
                "SQS batch size too large, clamping"
            );
            MAX_RECEIVE_BATCH
        } else {
            options.max_messages
        };

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages as i32)
            .wait_time_seconds(whole_secs(options.wait_time, MAX_WAIT_SECS))
            .visibility_timeout(whole_secs(options.visibility_timeout, i32::MAX as u64))
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| TransportError::receive(DisplayErrorContext(&e).to_string()))?;

        let messages: Vec<Message> = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(to_message)
            .collect();

        debug!(queue_url = %self.queue_url, count = messages.len(), "Received messages");
        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError> {
        if receipt_handle.is_empty() {
            return Err(TransportError::delete("message has no receipt handle"));
        }

        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| TransportError::delete(DisplayErrorContext(&e).to_string()))?;

        debug!(queue_url = %self.queue_url, "Deleted message");
        Ok(())
    }
}
