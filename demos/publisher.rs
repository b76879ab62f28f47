//! Publish one event to a running broker.
//!
//! ```sh
//! cargo run --bin bus-broker &
//! cargo run --example publisher
//! ```

use event_bus::{BusResult, Publisher, PublisherConfig};

#[tokio::main]
async fn main() -> BusResult<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // the default ingest endpoint is tcp://127.0.0.1:5558
    let config = PublisherConfig::new("someproducer");
    let publisher = Publisher::new(config)?;

    publisher
        .send("/examples/topic", serde_json::json!("somedata"))
        .await?;

    println!("Event was sent!");
    Ok(())
}
