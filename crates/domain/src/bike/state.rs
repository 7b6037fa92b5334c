//! Bike lifecycle states.

use serde::{Deserialize, Serialize};

/// The state of a bike in its lifecycle.
///
/// State transitions:
/// ```text
/// Unprovisioned ──Provision──► Available ◄──Return── Rented
///                                  │                   ▲
///                                  └──────RentOut──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BikeState {
    /// No events recorded for this identity.
    #[default]
    Unprovisioned,

    /// At a location, free to rent.
    Available,

    /// Held by a renter.
    Rented,
}

impl BikeState {
    /// Returns true if the bike is currently rented out.
    pub fn is_rented(&self) -> bool {
        matches!(self, BikeState::Rented)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BikeState::Unprovisioned => "Unprovisioned",
            BikeState::Available => "Available",
            BikeState::Rented => "Rented",
        }
    }
}

impl std::fmt::Display for BikeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
