use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, NewEvent, Result, Sequence,
    store::{EventStore, EventStream, validate_new_events},
};

#[derive(Default)]
struct Inner {
    /// Per-aggregate streams, each ordered by sequence.
    streams: HashMap<AggregateId, Vec<EventEnvelope>>,
    /// Global commit order as (aggregate, index into its stream).
    commit_log: Vec<(AggregateId, usize)>,
}

/// In-memory event store implementation.
///
/// Provides the same interface as the PostgreSQL implementation. A single
/// write lock covers the sequence check and the write, which makes
/// compare-and-append atomic.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.commit_log.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.streams.clear();
        inner.commit_log.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        expected: Sequence,
        events: Vec<NewEvent>,
    ) -> Result<Vec<EventEnvelope>> {
        validate_new_events(&events)?;

        let mut inner = self.inner.write().await;

        let actual = inner
            .streams
            .get(aggregate_id)
            .and_then(|stream| stream.last())
            .map(|e| e.sequence)
            .unwrap_or(Sequence::NONE);

        if actual != expected {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: aggregate_id.clone(),
                expected,
                actual,
            });
        }

        let mut sequence = expected;
        let envelopes: Vec<EventEnvelope> = events
            .into_iter()
            .map(|event| {
                sequence = sequence.next();
                event.into_envelope(aggregate_id.clone(), sequence)
            })
            .collect();

        let Inner {
            streams,
            commit_log,
        } = &mut *inner;
        let stream = streams.entry(aggregate_id.clone()).or_default();
        for envelope in &envelopes {
            commit_log.push((aggregate_id.clone(), stream.len()));
            stream.push(envelope.clone());
        }

        metrics::counter!("event_store_events_appended_total").increment(envelopes.len() as u64);

        Ok(envelopes)
    }

    async fn load_from(&self, aggregate_id: &AggregateId, from: Sequence) -> Result<EventStream> {
        let inner = self.inner.read().await;
        let events: Vec<EventEnvelope> = inner
            .streams
            .get(aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.sequence >= from)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn current_sequence(&self, aggregate_id: &AggregateId) -> Result<Sequence> {
        let inner = self.inner.read().await;
        Ok(inner
            .streams
            .get(aggregate_id)
            .and_then(|stream| stream.last())
            .map(|e| e.sequence)
            .unwrap_or(Sequence::NONE))
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        let matching = inner
            .commit_log
            .iter()
            .filter_map(|(id, index)| inner.streams.get(id).and_then(|s| s.get(*index)))
            .filter(|e| query.matches(e))
            .cloned();

        let events = match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        };
        Ok(events)
    }

    async fn stream_all(&self) -> Result<EventStream> {
        let inner = self.inner.read().await;
        let events: Vec<EventEnvelope> = inner
            .commit_log
            .iter()
            .filter_map(|(id, index)| inner.streams.get(id).and_then(|s| s.get(*index)))
            .cloned()
            .collect();

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}
