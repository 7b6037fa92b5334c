//! Bike commands.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::aggregate::DomainCommand;
use crate::error::DomainError;

pub const PROVISION: &str = "Provision";
pub const RENT_OUT: &str = "RentOut";
pub const RETURN: &str = "Return";

/// Commands accepted by a bike.
///
/// The wire form is `{"type": "<command>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BikeCommand {
    /// Add a new bike to the fleet at a location.
    Provision { location: String },

    /// Hand the bike to a renter.
    RentOut { renter: String },

    /// Drop the bike off at a location.
    Return { location: String },
}

impl BikeCommand {
    pub fn provision(location: impl Into<String>) -> Self {
        BikeCommand::Provision {
            location: location.into(),
        }
    }

    pub fn rent_out(renter: impl Into<String>) -> Self {
        BikeCommand::RentOut {
            renter: renter.into(),
        }
    }

    pub fn return_to(location: impl Into<String>) -> Self {
        BikeCommand::Return {
            location: location.into(),
        }
    }
}

impl DomainCommand for BikeCommand {
    fn command_type(&self) -> &'static str {
        match self {
            BikeCommand::Provision { .. } => PROVISION,
            BikeCommand::RentOut { .. } => RENT_OUT,
            BikeCommand::Return { .. } => RETURN,
        }
    }

    fn parse(command_type: &str, payload: Value) -> Result<Self, DomainError> {
        if !matches!(command_type, PROVISION | RENT_OUT | RETURN) {
            return Err(DomainError::InvalidCommand(format!(
                "unknown command type {command_type:?}"
            )));
        }

        serde_json::from_value(json!({ "type": command_type, "payload": payload }))
            .map_err(|e| DomainError::InvalidCommand(format!("{command_type}: {e}")))
    }

    fn validate(&self) -> Result<(), DomainError> {
        let (field, value) = match self {
            BikeCommand::Provision { location } | BikeCommand::Return { location } => {
                ("location", location)
            }
            BikeCommand::RentOut { renter } => ("renter", renter),
        };

        if value.trim().is_empty() {
            return Err(DomainError::InvalidCommand(format!(
                "{}: {field} must not be blank",
                self.command_type()
            )));
        }
        Ok(())
    }
}
