//! Bus broker - binary entry point
//!
//! Configuration comes from `BUS_*` environment variables; see
//! [`BrokerConfig::from_env`]. The process serves until Ctrl-C, then closes
//! its streams and persists the sequence counter.

use event_bus::{Broker, BrokerConfig, BusResult};

#[tokio::main]
async fn main() -> BusResult<()> {
    let filter = std::env::var("BUS_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BrokerConfig::from_env()?;
    let mut broker = Broker::new(config)?;
    broker.connect().await?;

    tokio::signal::ctrl_c().await?;

    broker.close()
}
