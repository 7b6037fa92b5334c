//! Shared types for the bike fleet event-sourcing service.

mod types;

pub use types::AggregateId;
