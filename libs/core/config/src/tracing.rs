use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Install color-eyre for error reports: file:line locations, no env section.
///
/// Call first thing in `main`. Repeated calls are ignored.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Filter used when `RUST_LOG` is unset.
///
/// Production keeps run summaries and failures and quiets the AWS SDK;
/// development adds per-message debug output from the worker.
fn default_filter(environment: &Environment) -> &'static str {
    if environment.is_production() {
        "info,aws_config=warn,aws_smithy_runtime=warn"
    } else {
        "info,queue_worker=debug"
    }
}

/// Initialize the tracing subscriber.
///
/// JSON in production, pretty output in development, both with an
/// `ErrorLayer` so eyre reports carry span traces. Logs go to stderr so
/// stdout stays free for run results. Later calls are no-ops.
pub fn init_tracing(environment: &Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(environment)));

    let result = if environment.is_production() {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => info!(?environment, "Tracing initialized"),
        // Already set up, e.g. by another test
        Err(_) => debug!("Tracing already initialized"),
    }
}
