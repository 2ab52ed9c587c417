//! Queue Drain - Entry Point
//!
//! Drains a queue in parallel batches and prints the run result as JSON.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    queue_drain::run().await
}
