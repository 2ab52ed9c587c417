//! Batch and run results
//!
//! A [`WorkResult`] describes one unit of work: a single receive call
//! ([`BatchResult`]) or a whole run of parallel batches ([`RunResult`]).

use crate::error::{FailureStage, QueueError};
use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One failed message (or failed batch)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFailure {
    /// Where in the pipeline the failure happened
    pub stage: FailureStage,

    /// Service-assigned message ID, if known
    pub message_id: Option<String>,

    /// Receipt handle of the failed delivery; `None` for batch-level failures
    pub receipt_handle: Option<String>,

    /// Rendered error
    pub error: String,
}

impl MessageFailure {
    /// Failure tied to a specific message
    pub fn for_message(message: &Message, error: &QueueError) -> Self {
        Self {
            stage: error.stage(),
            message_id: message.message_id.clone(),
            receipt_handle: Some(message.receipt_handle.clone()),
            error: error.to_string(),
        }
    }

    /// Failure of a whole batch, with no message attached
    pub fn for_batch(stage: FailureStage, error: impl std::fmt::Display) -> Self {
        Self {
            stage,
            message_id: None,
            receipt_handle: None,
            error: error.to_string(),
        }
    }
}

/// Outcome of a batch or a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkResult<O> {
    /// Human-readable summary
    pub message: String,

    pub start: DateTime<Utc>,

    pub end: DateTime<Utc>,

    /// Milliseconds between `start` and `end`
    pub duration_ms: u64,

    /// Number of receive calls made
    pub batches: usize,

    /// Messages returned by the queue
    pub received: usize,

    /// Messages handled and deleted
    pub succeeded: usize,

    /// Failure entries (per message, or per batch for receive failures)
    pub failed: usize,

    /// Handler outputs; `None` when details are disabled
    pub responses: Option<Vec<O>>,

    /// Failures; `None` when details are disabled
    pub errors: Option<Vec<MessageFailure>>,
}

/// Result of a single receive-and-process call
pub type BatchResult<O> = WorkResult<O>;

/// Aggregated result of one run
pub type RunResult<O> = WorkResult<O>;

impl<O> WorkResult<O> {
    /// Whether any failure was recorded
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Handler outputs, empty when details are disabled
    pub fn responses(&self) -> &[O] {
        self.responses.as_deref().unwrap_or_default()
    }

    /// Failures, empty when details are disabled
    pub fn errors(&self) -> &[MessageFailure] {
        self.errors.as_deref().unwrap_or_default()
    }
}

/// Absolute difference between two instants in milliseconds
pub fn millis_between(a: DateTime<Utc>, b: DateTime<Utc>) -> u64 {
    (b - a).num_milliseconds().unsigned_abs()
}

/// Collects outcomes and timing into a [`WorkResult`]
#[derive(Debug)]
pub(crate) struct ResultBuilder<O> {
    start: DateTime<Utc>,
    include_details: bool,
    batches: usize,
    received: usize,
    responses: Vec<O>,
    errors: Vec<MessageFailure>,
    succeeded: usize,
    failed: usize,
}

impl<O> ResultBuilder<O> {
    pub(crate) fn start(include_details: bool) -> Self {
        Self {
            start: Utc::now(),
            include_details,
            batches: 0,
            received: 0,
            responses: Vec::new(),
            errors: Vec::new(),
            succeeded: 0,
            failed: 0,
        }
    }

    pub(crate) fn received(&mut self, count: usize) {
        self.batches += 1;
        self.received += count;
    }

    pub(crate) fn success(&mut self, output: O) {
        self.succeeded += 1;
        if self.include_details {
            self.responses.push(output);
        }
    }

    pub(crate) fn failure(&mut self, failure: MessageFailure) {
        self.failed += 1;
        if self.include_details {
            self.errors.push(failure);
        }
    }

    /// Fold a finished batch into a run
    pub(crate) fn merge(&mut self, batch: WorkResult<O>) {
        self.batches += batch.batches;
        self.received += batch.received;
        self.succeeded += batch.succeeded;
        self.failed += batch.failed;
        if self.include_details {
            self.responses.extend(batch.responses.unwrap_or_default());
            self.errors.extend(batch.errors.unwrap_or_default());
        }
    }

    pub(crate) fn received_count(&self) -> usize {
        self.received
    }

    pub(crate) fn failed_count(&self) -> usize {
        self.failed
    }

    pub(crate) fn finish(self, message: impl Into<String>) -> WorkResult<O> {
        let end = Utc::now();
        let (responses, errors) = if self.include_details {
            (Some(self.responses), Some(self.errors))
        } else {
            (None, None)
        };

        WorkResult {
            message: message.into(),
            start: self.start,
            end,
            duration_ms: millis_between(self.start, end),
            batches: self.batches,
            received: self.received,
            succeeded: self.succeeded,
            failed: self.failed,
            responses,
            errors,
        }
    }
}
