//! Queue error types and failure stages
//!
//! Errors are split by where they happen in the receive -> decode -> handle -> delete
//! pipeline:
//! - **Transport**: the queue service rejected a receive or delete call
//! - **Decode**: the message body is not the structure the handler expects
//! - **Handler**: the registered handler reported a failure
//! - **Config**: the worker cannot be built with the given settings
//!
//! Only `Config` ever escapes, and only from construction. Everything else becomes a
//! [`MessageFailure`](crate::MessageFailure) in the run result.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Pipeline stage at which a failure was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The receive call for a whole batch failed
    Receive,
    /// The message body could not be decoded
    Decode,
    /// The handler returned an error
    Handler,
    /// The handler succeeded but the delete call failed
    Delete,
    /// The batch task itself died (panic or cancellation)
    Worker,
}

impl FailureStage {
    /// Whether the message is left on the queue for redelivery.
    ///
    /// Every per-message failure leaves the message undeleted; a failed delete
    /// means the handler already ran and the message will be seen again.
    pub fn message_retained(&self) -> bool {
        !matches!(self, FailureStage::Receive | FailureStage::Worker)
    }
}

/// Transport call that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum TransportOp {
    Receive,
    Delete,
}

/// Error raised by a queue transport on receive or delete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct TransportError {
    /// The transport call that failed
    pub operation: TransportOp,
    pub message: String,
}

impl TransportError {
    pub fn receive(message: impl Into<String>) -> Self {
        Self {
            operation: TransportOp::Receive,
            message: message.into(),
        }
    }

    pub fn delete(message: impl Into<String>) -> Self {
        Self {
            operation: TransportOp::Delete,
            message: message.into(),
        }
    }
}

/// Error returned by a [`MessageHandler`](crate::MessageHandler)
#[derive(Error, Debug)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Create a handler error from a plain message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it as the source
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<eyre::Report> for HandlerError {
    fn from(report: eyre::Report) -> Self {
        // Keep the whole context chain in the message
        HandlerError::new(format!("{report:#}"))
    }
}

/// Queue worker errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Receive or delete call failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message body could not be deserialized
    #[error("Decode error: {0}")]
    Decode(String),

    /// Handler signaled failure
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// The worker cannot run with the given configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Stage at which this error was raised
    pub fn stage(&self) -> FailureStage {
        match self {
            QueueError::Transport(e) => match e.operation {
                TransportOp::Receive => FailureStage::Receive,
                TransportOp::Delete => FailureStage::Delete,
            },
            QueueError::Decode(_) => FailureStage::Decode,
            QueueError::Handler(_) => FailureStage::Handler,
            QueueError::Config(_) => FailureStage::Worker,
        }
    }

    /// Whether this error must abort instead of being recorded as data
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::Config(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_stages() {
        assert_eq!(
            QueueError::from(TransportError::receive("timeout")).stage(),
            FailureStage::Receive
        );
        assert_eq!(
            QueueError::from(TransportError::delete("gone")).stage(),
            FailureStage::Delete
        );
        assert_eq!(QueueError::Decode("bad".into()).stage(), FailureStage::Decode);
        assert_eq!(
            QueueError::from(HandlerError::new("boom")).stage(),
            FailureStage::Handler
        );
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            TransportError::receive("throttled").to_string(),
            "receive failed: throttled"
        );
        assert_eq!(
            TransportError::delete("gone").operation,
            TransportOp::Delete
        );
    }

    #[test]
    fn test_only_config_is_fatal() {
        assert!(QueueError::Config("batch_size".into()).is_fatal());
        assert!(!QueueError::Decode("bad".into()).is_fatal());
        assert!(!QueueError::from(TransportError::receive("down")).is_fatal());
    }

    #[test]
    fn test_message_retained() {
        assert!(FailureStage::Decode.message_retained());
        assert!(FailureStage::Handler.message_retained());
        assert!(FailureStage::Delete.message_retained());
        assert!(!FailureStage::Receive.message_retained());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(FailureStage::Handler.to_string(), "handler");
        assert_eq!(FailureStage::Receive.as_ref(), "receive");
    }

    #[test]
    fn test_handler_error_keeps_source() {
        let io = std::io::Error::other("disk full");
        let err = HandlerError::from_error(io);
        assert_eq!(err.message(), "disk full");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_decode_from_serde() {
        let err: QueueError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, QueueError::Decode(_)));
        assert!(err.to_string().starts_with("Decode error"));
    }
}
