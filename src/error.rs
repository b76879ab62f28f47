//! Crate-level error type
//!
//! Component-specific errors (codec, store, config) are defined next to the
//! code that raises them; `BusError` is the umbrella returned by the broker,
//! subscriber, and publisher entry points.

use crate::config::ConfigError;
use crate::store::StoreError;
use crate::types::CodecError;

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Errors surfaced by the bus entry points
#[derive(Debug)]
pub enum BusError {
    Io(std::io::Error),
    Store(StoreError),
    Codec(CodecError),
    Config(ConfigError),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::Io(e) => write!(f, "IO error: {}", e),
            BusError::Store(e) => write!(f, "store error: {}", e),
            BusError::Codec(e) => write!(f, "codec error: {}", e),
            BusError::Config(e) => write!(f, "config error: {}", e),
        }
    }
}

impl std::error::Error for BusError {}

impl From<std::io::Error> for BusError {
    fn from(e: std::io::Error) -> Self {
        BusError::Io(e)
    }
}

impl From<StoreError> for BusError {
    fn from(e: StoreError) -> Self {
        BusError::Store(e)
    }
}

impl From<CodecError> for BusError {
    fn from(e: CodecError) -> Self {
        BusError::Codec(e)
    }
}

impl From<ConfigError> for BusError {
    fn from(e: ConfigError) -> Self {
        BusError::Config(e)
    }
}
