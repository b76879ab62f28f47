//! Bus configuration
//!
//! Each side of the bus is configured with explicit channel endpoints. When
//! only the broadcast endpoint is given, the other channels derive from it by
//! the fixed port convention: ingest is broadcast + 1, replay is
//! broadcast − 1. Defaults follow the reference deployment: replay on 5556,
//! broadcast on 5557, ingest on 5558.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{Endpoint, EndpointError};

/// Errors raised while resolving a configuration
#[derive(Debug)]
pub enum ConfigError {
    InvalidEndpoint(String),
    MissingProducerId,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidEndpoint(msg) => write!(f, "invalid endpoint: {}", msg),
            ConfigError::MissingProducerId => write!(f, "a producer id is required"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<EndpointError> for ConfigError {
    fn from(e: EndpointError) -> Self {
        ConfigError::InvalidEndpoint(e.to_string())
    }
}

fn default_broadcast() -> Endpoint {
    Endpoint::tcp("127.0.0.1", 5557)
}

/// Configuration for the broker process.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// One-to-many live event stream
    pub broadcast: Endpoint,
    /// Many-producers-to-one event intake
    pub ingest: Endpoint,
    /// Addressable replay request/response channel
    pub replay: Endpoint,
    /// Directory holding the event log and the sequence dump
    pub data_dir: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let broadcast = default_broadcast();
        Self {
            ingest: broadcast.with_port_offset(1),
            replay: broadcast.with_port_offset(-1),
            broadcast,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl BrokerConfig {
    /// Default endpoints with a custom data directory.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Override the broadcast endpoint and re-derive ingest (+1) and replay
    /// (−1) from it.
    pub fn with_broadcast_endpoint(mut self, broadcast: Endpoint) -> Self {
        self.ingest = broadcast.with_port_offset(1);
        self.replay = broadcast.with_port_offset(-1);
        self.broadcast = broadcast;
        self
    }

    /// Resolve from `BUS_*` environment variables; unset variables fall back
    /// to the defaults and the derivation rule above.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match read_env_endpoint("BUS_BROADCAST_ENDPOINT")? {
            Some(broadcast) => Self::default().with_broadcast_endpoint(broadcast),
            None => Self::default(),
        };
        if let Some(ingest) = read_env_endpoint("BUS_INGEST_ENDPOINT")? {
            config.ingest = ingest;
        }
        if let Some(replay) = read_env_endpoint("BUS_REPLAY_ENDPOINT")? {
            config.replay = replay;
        }
        if let Ok(data_dir) = std::env::var("BUS_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        Ok(config)
    }

    /// Path to the append-only event log.
    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    /// Path to the persisted sequence counter.
    pub fn sequence_path(&self) -> PathBuf {
        self.data_dir.join("sequence.json")
    }
}

fn read_env_endpoint(name: &str) -> Result<Option<Endpoint>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => Ok(Some(value.parse::<Endpoint>()?)),
        Err(_) => Ok(None),
    }
}

/// Configuration for a subscriber client.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Live event stream to attach to
    pub broadcast: Endpoint,
    /// Replay channel to sync missed events from
    pub replay: Endpoint,
    /// Directory holding the local event log and the cursor dump
    pub data_dir: PathBuf,
    /// Optional bound on how long to wait for replay to complete; `None`
    /// waits indefinitely (the reference behavior)
    pub replay_timeout: Option<Duration>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        let broadcast = default_broadcast();
        Self {
            replay: broadcast.with_port_offset(-1),
            broadcast,
            data_dir: PathBuf::from("data/subscriber"),
            replay_timeout: None,
        }
    }
}

impl SubscriberConfig {
    /// Default endpoints with a custom data directory.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Override the broadcast endpoint and re-derive replay (−1) from it.
    pub fn with_broadcast_endpoint(mut self, broadcast: Endpoint) -> Self {
        self.replay = broadcast.with_port_offset(-1);
        self.broadcast = broadcast;
        self
    }

    /// Path to the subscriber's local event log.
    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    /// Path to the persisted cursor.
    pub fn sequence_path(&self) -> PathBuf {
        self.data_dir.join("sequence.json")
    }
}

/// Configuration for a publisher client.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Broker ingest endpoint to push events to
    pub ingest: Endpoint,
    /// Identifier stamped on every published event; required
    pub producer_id: String,
}

impl PublisherConfig {
    pub fn new(producer_id: impl Into<String>) -> Self {
        Self {
            ingest: default_broadcast().with_port_offset(1),
            producer_id: producer_id.into(),
        }
    }

    /// Override the ingest endpoint.
    pub fn with_ingest_endpoint(mut self, ingest: Endpoint) -> Self {
        self.ingest = ingest;
        self
    }
}
