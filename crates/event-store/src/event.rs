use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateId;

/// Metadata key carrying the correlation id of the command that produced an event.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Metadata key carrying the type of the command that produced an event.
pub const COMMAND_TYPE_KEY: &str = "command_type";

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an event within its aggregate's stream.
///
/// The first event of a stream has sequence `0`. An empty stream is
/// [`Sequence::NONE`] (`-1`), which is what an append to a brand new
/// stream must expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(i64);

impl Sequence {
    /// The sequence of a stream with no events.
    pub const NONE: Sequence = Sequence(-1);

    /// The sequence of the first event in a stream.
    pub const FIRST: Sequence = Sequence(0);

    /// Creates a sequence from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the next sequence.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true if this denotes an empty stream.
    pub fn is_none(&self) -> bool {
        self.0 < 0
    }

    /// Returns the raw sequence value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::NONE
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Sequence {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Sequence> for i64 {
    fn from(sequence: Sequence) -> Self {
        sequence.0
    }
}

/// An event that has been decided but not yet committed to the log.
///
/// The log assigns the event id, sequence, and timestamp when it is appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// The type of the event (e.g., "Provisioned", "RentedOut").
    pub event_type: String,

    /// The type of aggregate (e.g., "Bike").
    pub aggregate_type: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewEvent {
    /// Creates a new uncommitted event from a raw JSON payload.
    pub fn new(
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Creates a new uncommitted event from a serializable payload.
    pub fn from_payload<T: Serialize>(
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            aggregate_type,
            event_type,
            serde_json::to_value(payload)?,
        ))
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Seals the event at the given position in the aggregate's stream.
    pub fn into_envelope(self, aggregate_id: AggregateId, sequence: Sequence) -> EventEnvelope {
        EventEnvelope {
            event_id: EventId::new(),
            event_type: self.event_type,
            aggregate_id,
            aggregate_type: self.aggregate_type,
            sequence,
            timestamp: Utc::now(),
            payload: self.payload,
            metadata: self.metadata,
        }
    }
}

/// A committed event together with its metadata.
///
/// Envelopes are immutable once written: they are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event.
    pub event_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate.
    pub aggregate_type: String,

    /// Zero-based, gap-free position within the aggregate's stream.
    pub sequence: Sequence,

    /// When the event was committed.
    pub timestamp: DateTime<Utc>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Returns the correlation id of the command that produced this event, if recorded.
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata
            .get(CORRELATION_ID_KEY)
            .and_then(|value| value.as_str())
    }
}
