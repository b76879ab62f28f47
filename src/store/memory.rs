//! In-memory store backends for tests

use parking_lot::RwLock;

use super::{EventStore, SequenceStore, StoreResult};
use crate::types::Event;

/// Event store holding everything in a Vec, in append order.
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, sequence: u64, event: &Event) -> StoreResult<()> {
        let mut record = event.clone();
        record.sequence = Some(sequence);
        self.events.write().push(record);
        Ok(())
    }

    fn events_after(&self, sequence: u64) -> StoreResult<Vec<Event>> {
        let mut events: Vec<Event> = self
            .events
            .read()
            .iter()
            .filter(|e| e.sequence.map(|s| s > sequence).unwrap_or(false))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    fn last_sequence(&self) -> StoreResult<Option<u64>> {
        Ok(self.events.read().iter().filter_map(|e| e.sequence).max())
    }
}

/// Sequence store holding a single optional value.
#[derive(Default)]
pub struct MemorySequenceStore {
    value: RwLock<Option<u64>>,
}

impl MemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the stored value (test setup helper).
    pub fn with_value(sequence: u64) -> Self {
        Self {
            value: RwLock::new(Some(sequence)),
        }
    }
}

impl SequenceStore for MemorySequenceStore {
    fn load(&self) -> StoreResult<Option<u64>> {
        Ok(*self.value.read())
    }

    fn save(&self, sequence: u64) -> StoreResult<()> {
        *self.value.write() = Some(sequence);
        Ok(())
    }
}
