//! Filesystem store backends
//!
//! Events are appended as one JSON line per event with an fsync per record;
//! the sequence value is a single JSON-encoded integer overwritten through an
//! atomic temp-file rename. Both stores are single-writer: the
//! broker's sequencer task or a subscriber's apply path is the only writer.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{EventStore, SequenceStore, StoreError, StoreResult};
use crate::types::Event;
use crate::utils::atomic_write;

/// Append-only JSONL event log.
#[derive(Debug)]
pub struct FileEventStore {
    path: PathBuf,
}

impl FileEventStore {
    /// Create a store writing to `path`. Fails fast on an empty path.
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidPath(
                "event store path must not be empty".to_string(),
            ));
        }
        Ok(Self { path })
    }

    /// Load every stored event in file order. Unparseable lines are skipped
    /// with a warning so one corrupt record cannot poison the log.
    fn load_all(&self) -> StoreResult<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(line = line_num + 1, error = %e, "skipping unparseable event record");
                }
            }
        }

        Ok(events)
    }
}

impl EventStore for FileEventStore {
    fn append(&self, sequence: u64, event: &Event) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        // The record is keyed by the assigned sequence, whatever the caller
        // left in the event itself.
        let mut record = event.clone();
        record.sequence = Some(sequence);

        let json_line = serde_json::to_string(&record)?;
        writeln!(file, "{}", json_line)?;

        // Sync to disk for durability
        file.sync_all()?;

        Ok(())
    }

    fn events_after(&self, sequence: u64) -> StoreResult<Vec<Event>> {
        let mut events: Vec<Event> = self
            .load_all()?
            .into_iter()
            .filter(|e| e.sequence.map(|s| s > sequence).unwrap_or(false))
            .collect();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    fn last_sequence(&self) -> StoreResult<Option<u64>> {
        Ok(self.load_all()?.iter().filter_map(|e| e.sequence).max())
    }
}

/// Single-value sequence persistence: one JSON integer in one file.
#[derive(Debug)]
pub struct FileSequenceStore {
    path: PathBuf,
}

impl FileSequenceStore {
    /// Create a store writing to `path`. Fails fast on an empty path.
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidPath(
                "sequence store path must not be empty".to_string(),
            ));
        }
        Ok(Self { path })
    }
}

impl SequenceStore for FileSequenceStore {
    fn load(&self) -> StoreResult<Option<u64>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let sequence = serde_json::from_str::<u64>(content.trim())?;
        Ok(Some(sequence))
    }

    fn save(&self, sequence: u64) -> StoreResult<()> {
        let json = serde_json::to_string(&sequence)?;
        atomic_write(&self.path, &json)?;
        Ok(())
    }
}
