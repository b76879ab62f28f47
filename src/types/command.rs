//! Replay-control command codec
//!
//! Commands are exchanged on the replay channel as three frames:
//! `[cmd, topics_csv, sequence]`. A `SYNC` tag is the exception: it is
//! prefixed onto a replayed event's frames rather than carrying topics and a
//! sequence of its own.

use super::{CodecError, CodecResult};
use crate::wire::Frame;

/// Replay-control command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCmd {
    /// client→broker: begin replay from the client's last known sequence
    SyncStart,
    /// broker→client: prefix tag on a replayed event's frames
    Sync,
    /// broker→client: replay complete, carries the broker's current sequence
    SyncEnd,
}

impl SyncCmd {
    /// Wire tag for this command.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncCmd::SyncStart => "SYNCSTART",
            SyncCmd::Sync => "SYNC",
            SyncCmd::SyncEnd => "SYNCEND",
        }
    }

    /// Parse a wire tag; `None` for unrecognized tags.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SYNCSTART" => Some(SyncCmd::SyncStart),
            "SYNC" => Some(SyncCmd::Sync),
            "SYNCEND" => Some(SyncCmd::SyncEnd),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control message exchanged on the replay channel.
///
/// `sequence` means the client's last applied sequence on `SYNCSTART` and the
/// broker's current global sequence on `SYNCEND`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommand {
    pub cmd: SyncCmd,
    /// Requested (or echoed) topic prefixes, order preserved
    pub topics: Vec<String>,
    pub sequence: u64,
}

impl SyncCommand {
    /// Replay request carrying the client's last known sequence.
    pub fn sync_start(topics: Vec<String>, sequence: u64) -> Self {
        Self {
            cmd: SyncCmd::SyncStart,
            topics,
            sequence,
        }
    }

    /// End-of-replay marker carrying the broker's current global sequence.
    pub fn sync_end(topics: Vec<String>, sequence: u64) -> Self {
        Self {
            cmd: SyncCmd::SyncEnd,
            topics,
            sequence,
        }
    }

    /// Encode into the three-frame wire representation.
    pub fn to_frames(&self) -> Vec<Frame> {
        vec![
            self.cmd.as_str().as_bytes().to_vec(),
            self.topics.join(",").into_bytes(),
            self.sequence.to_string().into_bytes(),
        ]
    }

    /// Decode from wire frames. Requires exactly three frames and a known
    /// command tag.
    pub fn from_frames(frames: &[Frame]) -> CodecResult<Self> {
        if frames.len() != 3 {
            return Err(CodecError::MalformedCommand(format!(
                "expected 3 frames, got {}",
                frames.len()
            )));
        }

        let tag = std::str::from_utf8(&frames[0])
            .map_err(|_| CodecError::MalformedCommand("non-utf8 command tag".to_string()))?;
        let cmd = SyncCmd::from_tag(tag)
            .ok_or_else(|| CodecError::MalformedCommand(format!("unknown command '{}'", tag)))?;

        let topics_csv = std::str::from_utf8(&frames[1])
            .map_err(|_| CodecError::MalformedCommand("non-utf8 topics frame".to_string()))?;
        let topics = if topics_csv.is_empty() {
            Vec::new()
        } else {
            topics_csv.split(',').map(str::to_string).collect()
        };

        let sequence_text = std::str::from_utf8(&frames[2])
            .map_err(|_| CodecError::MalformedCommand("non-utf8 sequence frame".to_string()))?;
        let sequence = sequence_text.parse::<u64>().map_err(|_| {
            CodecError::MalformedCommand(format!("invalid sequence frame '{}'", sequence_text))
        })?;

        Ok(Self {
            cmd,
            topics,
            sequence,
        })
    }
}
