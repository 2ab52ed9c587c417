//! Process-local queue with visibility-timeout semantics
//!
//! Useful for local runs and tests. Behaves like a hosted queue:
//! received messages are hidden for the visibility timeout, a new receipt
//! handle is issued on every delivery, and only the latest receipt handle of
//! a message can delete it.

use super::{QueueTransport, ReceiveOptions};
use crate::error::TransportError;
use crate::message::Message;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: String,
    receive_count: u32,
    receipt_handle: Option<String>,
    invisible_until: Option<Instant>,
}

impl Entry {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

/// In-memory queue transport
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    entries: Mutex<VecDeque<Entry>>,
    arrivals: Notify,
}

impl InMemoryQueue {
    /// Create an empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(VecDeque::new()),
            arrivals: Notify::new(),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a raw body and return its message ID
    pub fn send(&self, body: impl Into<String>) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.lock().push_back(Entry {
            message_id: message_id.clone(),
            body: body.into(),
            receive_count: 0,
            receipt_handle: None,
            invisible_until: None,
        });
        self.arrivals.notify_waiters();
        message_id
    }

    /// Serialize a value as JSON and enqueue it
    pub fn send_json<T: serde::Serialize>(&self, value: &T) -> Result<String, serde_json::Error> {
        let body = serde_json::to_string(value)?;
        Ok(self.send(body))
    }

    /// Messages not yet deleted, visible or not
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages currently hidden by a visibility timeout
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.lock().iter().filter(|e| !e.is_visible(now)).count()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_visible(&self, options: &ReceiveOptions) -> Vec<Message> {
        let now = Instant::now();
        let mut entries = self.lock();

        entries
            .iter_mut()
            .filter(|e| e.is_visible(now))
            .take(options.max_messages)
            .map(|entry| {
                let receipt_handle = Uuid::new_v4().to_string();
                entry.receive_count += 1;
                entry.receipt_handle = Some(receipt_handle.clone());
                entry.invisible_until = Some(now + options.visibility_timeout);

                Message::new(entry.body.clone(), receipt_handle)
                    .with_message_id(entry.message_id.clone())
                    .with_receive_count(entry.receive_count)
            })
            .collect()
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<Message>, TransportError> {
        let deadline = Instant::now() + options.wait_time;

        loop {
            // Register interest before checking so a concurrent send is not missed
            let arrived = self.arrivals.notified();

            let messages = self.take_visible(options);
            if !messages.is_empty() || Instant::now() >= deadline {
                debug!(queue = %self.name, count = messages.len(), "Received messages");
                return Ok(messages);
            }

            // Hidden messages may become visible before anything new arrives
            let next_visible = {
                let entries = self.lock();
                entries.iter().filter_map(|e| e.invisible_until).min()
            };
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));

            let _ = tokio::time::timeout_at(wake_at, arrived).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError> {
        let mut entries = self.lock();

        let position = entries
            .iter()
            .position(|e| e.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                TransportError::delete(format!(
                    "receipt handle {receipt_handle} is not valid for queue {}",
                    self.name
                ))
            })?;

        entries.remove(position);
        debug!(queue = %self.name, receipt_handle = %receipt_handle, "Deleted message");
        Ok(())
    }
}
