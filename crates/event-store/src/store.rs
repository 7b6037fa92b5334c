use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::TryStreamExt;

use crate::{AggregateId, EventEnvelope, EventQuery, EventStoreError, NewEvent, Result, Sequence};

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Core trait for event log implementations.
///
/// The log is append-only and ordered per aggregate identity. It is the only
/// mutable shared resource in the system: every write goes through the
/// compare-and-append contract of [`EventStore::append`].
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to an aggregate's stream.
    ///
    /// Succeeds only if `expected` equals the sequence of the last stored
    /// event for `aggregate_id` ([`Sequence::NONE`] for a new stream).
    /// Otherwise fails with `ConcurrencyConflict` and writes nothing.
    ///
    /// On success the events are written atomically with consecutive
    /// sequences starting at `expected + 1`, and the committed envelopes
    /// are returned in order.
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        expected: Sequence,
        events: Vec<NewEvent>,
    ) -> Result<Vec<EventEnvelope>>;

    /// Streams every event of an aggregate in sequence order.
    ///
    /// Each call starts a fresh stream from the first event.
    async fn load(&self, aggregate_id: &AggregateId) -> Result<EventStream> {
        self.load_from(aggregate_id, Sequence::FIRST).await
    }

    /// Streams an aggregate's events starting at `from` (inclusive).
    async fn load_from(&self, aggregate_id: &AggregateId, from: Sequence) -> Result<EventStream>;

    /// Returns the sequence of the last stored event, or [`Sequence::NONE`].
    async fn current_sequence(&self, aggregate_id: &AggregateId) -> Result<Sequence>;

    /// Retrieves events matching a query.
    ///
    /// Results are ordered by commit order.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Streams all events in the store in commit order.
    ///
    /// Every event committed before the call is yielded exactly once. Events
    /// committed while the stream is being read may be missed; the router
    /// that committed them delivers them through its publisher.
    async fn stream_all(&self) -> Result<EventStream>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Collects an aggregate's full stream.
    async fn load_all(&self, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>> {
        self.load(aggregate_id).await?.try_collect().await
    }

    /// Checks if an aggregate exists (has any events).
    async fn aggregate_exists(&self, aggregate_id: &AggregateId) -> Result<bool> {
        Ok(!self.current_sequence(aggregate_id).await?.is_none())
    }

    /// Finds the events a given command appended to an aggregate's stream.
    ///
    /// Returns an empty list when the command never committed.
    async fn find_by_correlation(
        &self,
        aggregate_id: &AggregateId,
        correlation_id: &str,
    ) -> Result<Vec<EventEnvelope>> {
        let events = self.load_all(aggregate_id).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.correlation_id() == Some(correlation_id))
            .collect())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates events before appending.
pub fn validate_new_events(events: &[NewEvent]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "Cannot append empty event list".to_string(),
        ));
    };

    for event in events {
        if event.event_type.is_empty() {
            return Err(EventStoreError::InvalidAppend(
                "Event type must not be empty".to_string(),
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::InvalidAppend(
                "All events must have the same aggregate type".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_append() {
        let result = validate_new_events(&[]);
        assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
    }

    #[test]
    fn rejects_mixed_aggregate_types() {
        let events = vec![
            NewEvent::new("Bike", "Provisioned", serde_json::json!({})),
            NewEvent::new("Dock", "Installed", serde_json::json!({})),
        ];
        assert!(validate_new_events(&events).is_err());
    }

    #[test]
    fn accepts_homogeneous_batch() {
        let events = vec![
            NewEvent::new("Bike", "Provisioned", serde_json::json!({})),
            NewEvent::new("Bike", "RentedOut", serde_json::json!({})),
        ];
        assert!(validate_new_events(&events).is_ok());
    }
}
