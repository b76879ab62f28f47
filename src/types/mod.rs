//! Core wire types
//!
//! This module defines the two message types that travel the bus (the
//! [`Event`] published by producers and the [`SyncCommand`] exchanged on the
//! replay channel) together with the typed [`Endpoint`] used for channel
//! addressing.

pub mod command;
pub mod endpoint;
pub mod event;

pub use command::{SyncCmd, SyncCommand};
pub use endpoint::{Endpoint, EndpointError};
pub use event::Event;

/// Result type for frame codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding wire frames
#[derive(Debug)]
pub enum CodecError {
    /// An event frame sequence could not be decoded
    MalformedEvent(String),
    /// A sync command frame sequence could not be decoded
    MalformedCommand(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::MalformedEvent(msg) => write!(f, "malformed event: {}", msg),
            CodecError::MalformedCommand(msg) => write!(f, "malformed command: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}
