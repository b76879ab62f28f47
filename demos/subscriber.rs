//! Subscribe to a topic subtree, replaying anything missed since the last
//! run, then print live events until Ctrl-C.
//!
//! ```sh
//! cargo run --bin bus-broker &
//! cargo run --example subscriber
//! ```

use event_bus::{BusResult, Subscriber, SubscriberConfig};

#[tokio::main]
async fn main() -> BusResult<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // the default broadcast endpoint is tcp://127.0.0.1:5557; the cursor and
    // the local event log land under this directory
    let config = SubscriberConfig::new("/tmp/examples_subscriber");
    let mut subscriber = Subscriber::new(config)?;

    subscriber.on("/examples", |data: &serde_json::Value| {
        println!("Event was received => {}", data);
    });

    subscriber.connect().await?;

    tokio::signal::ctrl_c().await?;

    subscriber.close()
}
