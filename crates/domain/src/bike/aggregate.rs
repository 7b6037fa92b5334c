//! Bike aggregate implementation.

use std::sync::LazyLock;

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::transition::TransitionTable;

use super::{BikeCommand, BikeEvent, BikeState, commands};

/// Bike aggregate root.
///
/// A bike is provisioned at a location, then alternates between being rented
/// out and returned. Returning a bike moves it to the drop-off location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bike {
    id: AggregateId,
    state: BikeState,
    location: Option<String>,
    renter: Option<String>,
}

static BIKE_TRANSITIONS: LazyLock<TransitionTable<Bike>> = LazyLock::new(|| {
    use BikeState::*;

    TransitionTable::new()
        .on(Unprovisioned, commands::PROVISION, Available, provision)
        .on(Available, commands::RENT_OUT, Rented, rent_out)
        .on(Rented, commands::RETURN, Available, return_bike)
        .reject(Available, commands::PROVISION, "already provisioned")
        .reject(Rented, commands::PROVISION, "already provisioned")
        .reject(Rented, commands::RENT_OUT, "already rented")
        .reject(Available, commands::RETURN, "not currently rented")
});

fn provision(_: &Bike, command: &BikeCommand) -> Vec<BikeEvent> {
    match command {
        BikeCommand::Provision { location } => vec![BikeEvent::provisioned(location.as_str())],
        _ => vec![],
    }
}

fn rent_out(_: &Bike, command: &BikeCommand) -> Vec<BikeEvent> {
    match command {
        BikeCommand::RentOut { renter } => vec![BikeEvent::rented_out(renter.as_str())],
        _ => vec![],
    }
}

fn return_bike(_: &Bike, command: &BikeCommand) -> Vec<BikeEvent> {
    match command {
        BikeCommand::Return { location } => vec![BikeEvent::returned(location.as_str())],
        _ => vec![],
    }
}

impl Aggregate for Bike {
    type Event = BikeEvent;
    type Command = BikeCommand;
    type Tag = BikeState;

    fn aggregate_type() -> &'static str {
        "Bike"
    }

    fn initial(id: AggregateId) -> Self {
        Bike {
            id,
            state: BikeState::Unprovisioned,
            location: None,
            renter: None,
        }
    }

    fn initial_tag() -> BikeState {
        BikeState::Unprovisioned
    }

    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn tag(&self) -> BikeState {
        self.state
    }

    fn apply(self, event: &BikeEvent) -> Self {
        match event {
            BikeEvent::Provisioned(data) => Bike {
                state: BikeState::Available,
                location: Some(data.location.clone()),
                ..self
            },
            BikeEvent::RentedOut(data) => Bike {
                state: BikeState::Rented,
                renter: Some(data.renter.clone()),
                ..self
            },
            BikeEvent::Returned(data) => Bike {
                state: BikeState::Available,
                location: Some(data.location.clone()),
                renter: None,
                ..self
            },
        }
    }

    fn transitions() -> &'static TransitionTable<Self> {
        &BIKE_TRANSITIONS
    }
}

// Query methods
impl Bike {
    /// Returns the current state.
    pub fn state(&self) -> BikeState {
        self.state
    }

    /// Returns the last known location. Unchanged while the bike is rented.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Returns the current renter, if rented.
    pub fn renter(&self) -> Option<&str> {
        self.renter.as_deref()
    }

    pub fn is_rented(&self) -> bool {
        self.state.is_rented()
    }
}
