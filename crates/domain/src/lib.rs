//! Domain layer for the bike rental service.
//!
//! This crate provides:
//! - `Aggregate`, `DomainEvent`, and `DomainCommand` traits
//! - Data-driven transition tables
//! - The bike aggregate and its state machine
//! - `CommandRouter`, which serializes commands per identity and retries on conflict

pub mod aggregate;
pub mod bike;
pub mod command;
pub mod error;
pub mod router;
pub mod transition;

pub use aggregate::{Aggregate, DomainCommand, DomainEvent, Replayed, rehydrate, replay};
pub use bike::{Bike, BikeCommand, BikeEvent, BikeService, BikeState};
pub use command::{Command, CommandOutcome};
pub use error::DomainError;
pub use router::{CommandHandle, CommandResult, CommandRouter, RouterConfig};
pub use transition::{Decision, EventFactory, Transition, TransitionTable};
