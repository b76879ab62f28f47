//! Producer-facing publisher client
//!
//! A publisher stamps events with its configured producer id and pushes them
//! to the broker's ingest endpoint. Sends are fire-and-forget: the broker
//! never answers a producer, and the connection is released after each send.

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::{ConfigError, PublisherConfig};
use crate::error::{BusError, BusResult};
use crate::types::Event;
use crate::wire;

/// A bus client that publishes events.
#[derive(Debug)]
pub struct Publisher {
    config: PublisherConfig,
}

impl Publisher {
    /// Create a publisher. Fails fast when no producer id is configured.
    pub fn new(config: PublisherConfig) -> BusResult<Self> {
        if config.producer_id.is_empty() {
            return Err(BusError::Config(ConfigError::MissingProducerId));
        }
        info!(
            producer = %config.producer_id,
            endpoint = %config.ingest,
            "producer opened a publisher stream"
        );
        Ok(Self { config })
    }

    /// Build an event for `topic` and push it to the broker.
    ///
    /// The event leaves with no sequence; assignment is the broker's job.
    pub async fn send(&self, topic: impl Into<String>, data: Value) -> BusResult<()> {
        let event = Event::new(self.config.producer_id.as_str(), topic, data);
        debug!(
            topic = %event.topic,
            uuid = %event.uuid,
            producer = %event.producer,
            "publishing event"
        );

        let frames = event.to_frames()?;
        let mut stream = TcpStream::connect(self.config.ingest.addr()).await?;
        wire::write_message(&mut stream, &frames).await?;
        stream.shutdown().await?;

        Ok(())
    }
}
