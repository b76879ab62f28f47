//! Ordered publish/subscribe event bus
//!
//! A lightweight bus with a single broker of record: producers push events,
//! the broker assigns a global monotonic sequence to each one and fans it out
//! to live subscribers, and a subscriber that joins late replays everything
//! it missed before switching to live delivery. Subscribers never silently
//! skip events, regardless of when they connect.
//!
//! # Modules
//!
//! - `types`: wire types (Event, SyncCommand, Endpoint) and frame codecs
//! - `wire`: multipart frame transport over TCP
//! - `config`: endpoint and store configuration with ±1 port derivation
//! - `broker`: sequencing broker with ingest, broadcast, and replay channels
//! - `subscriber`: catch-up/live subscriber client
//! - `publisher`: producer-facing publish client
//! - `store`: event log and sequence cursor persistence
//! - `utils`: atomic file write helper
//!
//! # Example
//!
//! ```no_run
//! use event_bus::{Publisher, PublisherConfig};
//!
//! #[tokio::main]
//! async fn main() -> event_bus::BusResult<()> {
//!     let publisher = Publisher::new(PublisherConfig::new("someproducer"))?;
//!     publisher.send("/example/topic", serde_json::json!({ "x": 1 })).await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod publisher;
pub mod store;
pub mod subscriber;
pub mod types;
pub mod utils;
pub mod wire;

// Re-export commonly used items at crate root
pub use broker::{Broker, BrokerEndpoints};
pub use config::{BrokerConfig, ConfigError, PublisherConfig, SubscriberConfig};
pub use error::{BusError, BusResult};
pub use publisher::Publisher;
pub use subscriber::{EventHandler, Subscriber};
pub use types::{CodecError, Endpoint, Event, SyncCmd, SyncCommand};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
