//! Default handler: log each message and acknowledge it.

use async_trait::async_trait;
use queue_worker::{HandlerError, MessageHandler};
use serde_json::{json, Value};
use tracing::info;

/// Accepts any JSON body, logs it and reports `{"ok": true}`
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    type Body = Value;
    type Output = Value;

    async fn handle(&self, body: Value) -> Result<Value, HandlerError> {
        info!(body = %body, "Handled message");
        Ok(json!({ "ok": true }))
    }

    fn name(&self) -> &'static str {
        "LogHandler"
    }
}
