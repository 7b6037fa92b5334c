//! Read models and projections for the query side.
//!
//! This crate provides:
//! - [`Projection`] trait for idempotently folding events into read models
//! - [`ProjectionPublisher`], which delivers committed events to projections
//!   through per-projection outboxes
//! - [`BikeStatusRepository`] with an in-memory implementation
//! - Two views: bike status and renter ledger

pub mod error;
pub mod projection;
pub mod publisher;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use projection::{Applied, Projection, StreamPosition, stream_position};
pub use publisher::{ProjectionFailure, ProjectionPublisher, PublisherConfig};
pub use read_model::{BikeStatus, BikeStatusRepository, InMemoryBikeStatusRepository};
pub use views::{BikeStatusProjection, RenterLedgerView, RenterSummary};
