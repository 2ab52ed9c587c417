//! Received message envelope
//!
//! Wraps a raw payload with the delivery metadata needed to acknowledge it.

use crate::error::QueueError;
use serde::de::DeserializeOwned;

/// A message as handed out by a [`QueueTransport`](crate::QueueTransport)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Service-assigned message ID, when the transport exposes one
    pub message_id: Option<String>,

    /// Raw payload
    pub body: String,

    /// Token required to delete this particular delivery
    pub receipt_handle: String,

    /// Number of times this message has been delivered (1 on first delivery)
    pub receive_count: u32,
}

impl Message {
    /// Create a first-delivery message
    pub fn new(body: impl Into<String>, receipt_handle: impl Into<String>) -> Self {
        Self {
            message_id: None,
            body: body.into(),
            receipt_handle: receipt_handle.into(),
            receive_count: 1,
        }
    }

    /// Set the message ID
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Set the delivery count
    pub fn with_receive_count(mut self, count: u32) -> Self {
        self.receive_count = count;
        self
    }

    /// Deserialize the JSON body
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Check if this is a redelivery
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }

    /// Identifier used in logs: the message ID if known, else the receipt handle
    pub fn label(&self) -> &str {
        self.message_id.as_deref().unwrap_or(&self.receipt_handle)
    }
}
