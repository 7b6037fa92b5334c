//! Append-only event log.
//!
//! Each aggregate identity owns an ordered, gap-free stream of events starting
//! at sequence `0`. Writers append with an expected sequence; a stale
//! expectation is rejected as a concurrency conflict and nothing is written.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod publish;
pub mod query;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{
    COMMAND_TYPE_KEY, CORRELATION_ID_KEY, EventEnvelope, EventId, NewEvent, Sequence,
};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use publish::{EventPublisher, NoopPublisher};
pub use query::EventQuery;
pub use store::{EventStore, EventStoreExt, EventStream};
