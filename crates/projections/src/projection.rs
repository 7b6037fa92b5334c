//! Core projection trait and per-identity ordering checks.

use async_trait::async_trait;
use event_store::{EventEnvelope, Sequence};

use crate::{ProjectionError, Result};

/// What a projection did with a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The read model changed (or its checkpoint advanced).
    Applied,
    /// The event was already applied; nothing changed.
    Duplicate,
    /// The event is not relevant to this projection.
    Ignored,
}

/// A projection that processes events and updates a read model.
///
/// Events may be delivered more than once, so `apply` must be idempotent:
/// redelivering an event that was already applied returns
/// [`Applied::Duplicate`] and leaves the read model untouched.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Returns the name of this projection.
    fn name(&self) -> &'static str;

    /// Applies a single event.
    async fn apply(&self, event: &EventEnvelope) -> Result<Applied>;

    /// Resets the projection to its initial state.
    async fn reset(&self) -> Result<()>;
}

/// Where an incoming event sits relative to the last one applied for its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPosition {
    /// Exactly one past the last applied event.
    Next,
    /// At or before the last applied event.
    Duplicate,
}

/// Classifies `event` against `last_applied` (`Sequence::NONE` if nothing yet).
pub fn stream_position(last_applied: Sequence, event: &EventEnvelope) -> Result<StreamPosition> {
    if event.sequence <= last_applied {
        return Ok(StreamPosition::Duplicate);
    }

    let expected = last_applied.next();
    if event.sequence != expected {
        return Err(ProjectionError::SequenceGap {
            aggregate_id: event.aggregate_id.clone(),
            expected,
            found: event.sequence,
        });
    }
    Ok(StreamPosition::Next)
}
