//! Projection error types.

use common::AggregateId;
use event_store::Sequence;
use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// Failed to deserialize an event payload.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An update arrived for a row that was never created.
    #[error("No row for {aggregate_id} when applying {event_type}")]
    MissingRow {
        aggregate_id: AggregateId,
        event_type: String,
    },

    /// Events for an identity arrived out of order.
    #[error("Sequence gap for {aggregate_id}: expected {expected}, found {found}")]
    SequenceGap {
        aggregate_id: AggregateId,
        expected: Sequence,
        found: Sequence,
    },

    /// The read-model store could not be reached.
    #[error("Read model store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ProjectionError {
    /// Returns true if retrying the same event may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProjectionError::StoreUnavailable(_))
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
