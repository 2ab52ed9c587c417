//! Message handler trait
//!
//! The handler is the caller's business logic. It is injected into the
//! [`QueueWorker`](crate::QueueWorker) at construction, so a worker can never
//! run without one.

use crate::error::HandlerError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for message handlers.
///
/// The worker decodes every message body into [`Self::Body`] and passes it to
/// [`handle`](Self::handle). An `Ok` output leads to the message being deleted;
/// an `Err` leaves it on the queue for redelivery.
///
/// Handlers are shared across every concurrently processed message, within a
/// batch and across batches, so `handle` must be safe to call concurrently.
///
/// # Example
///
/// ```rust,ignore
/// use queue_worker::{HandlerError, MessageHandler};
///
/// struct InvoiceHandler {
///     billing: Arc<BillingClient>,
/// }
///
/// #[async_trait]
/// impl MessageHandler for InvoiceHandler {
///     type Body = InvoiceRequested;
///     type Output = InvoiceId;
///
///     async fn handle(&self, body: InvoiceRequested) -> Result<InvoiceId, HandlerError> {
///         self.billing.issue(body).await.map_err(HandlerError::from_error)
///     }
///
///     fn name(&self) -> &'static str {
///         "InvoiceHandler"
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Decoded message body
    type Body: DeserializeOwned + Send + 'static;

    /// Value recorded in the result on success
    type Output: Send + 'static;

    /// Handle one decoded message.
    async fn handle(&self, body: Self::Body) -> Result<Self::Output, HandlerError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str {
        "handler"
    }
}

/// Handler built from an async closure. See [`handler_fn`].
pub struct FnHandler<F, B, O> {
    f: F,
    _marker: PhantomData<fn(B) -> O>,
}

/// Wrap an async closure as a [`MessageHandler`].
///
/// ```rust,ignore
/// let handler = handler_fn(|body: serde_json::Value| async move {
///     tracing::info!(%body, "got message");
///     Ok::<_, HandlerError>(true)
/// });
/// ```
pub fn handler_fn<F, Fut, B, O>(f: F) -> FnHandler<F, B, O>
where
    F: Fn(B) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, HandlerError>> + Send,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, B, O> MessageHandler for FnHandler<F, B, O>
where
    F: Fn(B) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, HandlerError>> + Send,
    B: DeserializeOwned + Send + 'static,
    O: Send + 'static,
{
    type Body = B;
    type Output = O;

    async fn handle(&self, body: B) -> Result<O, HandlerError> {
        (self.f)(body).await
    }

    fn name(&self) -> &'static str {
        "fn_handler"
    }
}
