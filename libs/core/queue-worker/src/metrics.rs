//! Prometheus metrics for queue workers
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed with [`init_metrics`].

use crate::error::FailureStage;
use crate::result::WorkResult;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Duration;
use strum::AsRefStr;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// With `listen` set, metrics are served over HTTP at that address;
/// otherwise they are kept in-process and read with [`render_metrics`].
/// Must be called from within a Tokio runtime when `listen` is set.
pub fn init_metrics(listen: Option<SocketAddr>) -> Result<(), BuildError> {
    match listen {
        Some(addr) => {
            PrometheusBuilder::new().with_http_listener(addr).install()?;
            info!(%addr, "Prometheus exporter listening");
        }
        None => {
            let handle = PrometheusBuilder::new().install_recorder()?;
            let _ = PROMETHEUS_HANDLE.set(handle);
            info!("Prometheus metrics initialized");
        }
    }
    Ok(())
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Final state of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum MessageOutcome {
    Success,
    DecodeFailed,
    HandlerFailed,
    DeleteFailed,
}

impl MessageOutcome {
    /// Outcome for a per-message failure stage; `None` for batch-level stages
    pub fn for_stage(stage: FailureStage) -> Option<Self> {
        match stage {
            FailureStage::Decode => Some(MessageOutcome::DecodeFailed),
            FailureStage::Handler => Some(MessageOutcome::HandlerFailed),
            FailureStage::Delete => Some(MessageOutcome::DeleteFailed),
            FailureStage::Receive | FailureStage::Worker => None,
        }
    }
}

/// Record the final state of a message
pub fn record_message(queue: &str, outcome: MessageOutcome) {
    counter!(
        "queue_worker_messages_total",
        "queue" => queue.to_string(),
        "outcome" => outcome.as_ref().to_string()
    )
    .increment(1);
}

/// Record a batch that failed as a whole (receive error or crashed task)
pub fn record_batch_failure(queue: &str, stage: FailureStage) {
    counter!(
        "queue_worker_batch_failures_total",
        "queue" => queue.to_string(),
        "stage" => stage.as_ref().to_string()
    )
    .increment(1);
}

/// Record how many messages a receive call returned
pub fn record_batch_size(queue: &str, size: usize) {
    histogram!(
        "queue_worker_batch_size",
        "queue" => queue.to_string()
    )
    .record(size as f64);
}

/// Record a finished run
pub fn record_run<O>(queue: &str, run: &WorkResult<O>) {
    histogram!(
        "queue_worker_run_duration_seconds",
        "queue" => queue.to_string()
    )
    .record(Duration::from_millis(run.duration_ms).as_secs_f64());

    counter!(
        "queue_worker_runs_total",
        "queue" => queue.to_string(),
        "status" => if run.has_failures() { "partial" } else { "ok" }
    )
    .increment(1);
}
