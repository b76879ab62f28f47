//! Event and sequence persistence
//!
//! The broker and the subscriber both depend on two small storage
//! collaborators: an append-only [`EventStore`] queried by sequence, and a
//! [`SequenceStore`] holding a single cursor value. The filesystem
//! implementations are the reference backends; the in-memory ones back unit
//! tests.

pub mod filesystem;
pub mod memory;

pub use filesystem::{FileEventStore, FileSequenceStore};
pub use memory::{MemoryEventStore, MemorySequenceStore};

use crate::types::Event;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Json(serde_json::Error),
    InvalidPath(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Json(e) => write!(f, "JSON error: {}", e),
            StoreError::InvalidPath(msg) => write!(f, "invalid store path: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

/// Append/query access to persisted events, keyed by assigned sequence.
pub trait EventStore: Send + Sync {
    /// Append an event under its assigned sequence.
    fn append(&self, sequence: u64, event: &Event) -> StoreResult<()>;

    /// All stored events with sequence strictly greater than `sequence`, in
    /// ascending sequence order.
    fn events_after(&self, sequence: u64) -> StoreResult<Vec<Event>>;

    /// Highest stored sequence, if any event has been stored.
    fn last_sequence(&self) -> StoreResult<Option<u64>>;
}

/// Persistence for a single sequence value (the broker's counter or a
/// subscriber's cursor).
pub trait SequenceStore: Send + Sync {
    /// Last saved sequence; `None` when nothing has been saved yet.
    fn load(&self) -> StoreResult<Option<u64>>;

    /// Overwrite the saved sequence.
    fn save(&self, sequence: u64) -> StoreResult<()>;
}
