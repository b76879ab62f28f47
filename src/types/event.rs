//! Bus event type and frame codec
//!
//! An event travels the bus as an ordered sequence of six frames:
//!
//! ```text
//! [topic, sequence, producer, timestamp, uuid, data]
//! ```
//!
//! The `sequence` frame is empty until the broker assigns one; an absent
//! sequence must never be confused with sequence zero. The `data` frame is a
//! self-describing MessagePack block so heterogeneous payloads round-trip
//! exactly: `false` and `null` inside the payload survive, and a `null`
//! payload serializes as an empty frame and decodes back to `null`.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CodecError, CodecResult};
use crate::wire::Frame;

/// One unit of published data.
///
/// Events are immutable once the broker has assigned a sequence; the sequence
/// defines the total delivery order across all topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Hierarchical topic path (e.g. `/a/b/c`), matched by prefix
    pub topic: String,

    /// Global sequence number; `None` until assigned by the broker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    /// Identifier of the originating producer (informational only)
    pub producer: String,

    /// Creation time, millisecond precision
    pub timestamp: DateTime<Utc>,

    /// Unique event id, generated on the producer side when not supplied
    pub uuid: String,

    /// Opaque application payload; `Value::Null` means "no payload"
    pub data: Value,
}

impl Event {
    /// Create a new unsequenced event, stamping the current time and a fresh
    /// uuid.
    pub fn new(producer: impl Into<String>, topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            sequence: None,
            producer: producer.into(),
            timestamp: now_millis(),
            uuid: uuid::Uuid::new_v4().to_string(),
            data,
        }
    }

    /// Encode the event into its six-frame wire representation.
    ///
    /// `sequence` serializes as an empty frame when unassigned and `data`
    /// serializes as an empty frame when null; both decode back to their
    /// absent forms, not to defaults.
    pub fn to_frames(&self) -> CodecResult<Vec<Frame>> {
        let data = match &self.data {
            Value::Null => Frame::new(),
            value => rmp_serde::to_vec(value)
                .map_err(|e| CodecError::MalformedEvent(format!("unserializable data: {}", e)))?,
        };

        Ok(vec![
            self.topic.clone().into_bytes(),
            self.sequence
                .map(|s| s.to_string().into_bytes())
                .unwrap_or_default(),
            self.producer.clone().into_bytes(),
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into_bytes(),
            self.uuid.clone().into_bytes(),
            data,
        ])
    }

    /// Decode an event from wire frames.
    ///
    /// Tolerant of fewer than six frames: missing trailing fields default to
    /// empty/absent values. A frame that is present but undecodable is a
    /// [`CodecError::MalformedEvent`], never a silent drop.
    pub fn from_frames(frames: &[Frame]) -> CodecResult<Self> {
        let topic = utf8_frame(frames.first(), "topic")?;

        let sequence = match frames.get(1) {
            None => None,
            Some(frame) if frame.is_empty() => None,
            Some(frame) => {
                let text = utf8_frame(Some(frame), "sequence")?;
                Some(text.parse::<u64>().map_err(|_| {
                    CodecError::MalformedEvent(format!("invalid sequence frame '{}'", text))
                })?)
            }
        };

        let producer = utf8_frame(frames.get(2), "producer")?;

        let timestamp = match frames.get(3) {
            None => now_millis(),
            Some(frame) if frame.is_empty() => now_millis(),
            Some(frame) => {
                let text = utf8_frame(Some(frame), "timestamp")?;
                DateTime::parse_from_rfc3339(&text)
                    .map_err(|_| {
                        CodecError::MalformedEvent(format!("invalid timestamp frame '{}'", text))
                    })?
                    .with_timezone(&Utc)
            }
        };

        let uuid = utf8_frame(frames.get(4), "uuid")?;

        let data = match frames.get(5) {
            None => Value::Null,
            Some(frame) if frame.is_empty() => Value::Null,
            Some(frame) => rmp_serde::from_slice(frame)
                .map_err(|e| CodecError::MalformedEvent(format!("undecodable data frame: {}", e)))?,
        };

        Ok(Self {
            topic,
            sequence,
            producer,
            timestamp,
            uuid,
            data,
        })
    }
}

/// Decode an optional frame as UTF-8, defaulting to the empty string.
fn utf8_frame(frame: Option<&Frame>, field: &str) -> CodecResult<String> {
    match frame {
        None => Ok(String::new()),
        Some(bytes) => String::from_utf8(bytes.clone())
            .map_err(|_| CodecError::MalformedEvent(format!("non-utf8 {} frame", field))),
    }
}

/// Current time truncated to millisecond precision, matching what the wire
/// format can represent so encode→decode round-trips compare equal.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}
