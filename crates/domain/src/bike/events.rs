//! Bike domain events.
//!
//! The stored payload is the event's data struct; the variant is carried by
//! the event type tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::DomainEvent;

pub const PROVISIONED: &str = "Provisioned";
pub const RENTED_OUT: &str = "RentedOut";
pub const RETURNED: &str = "Returned";

/// Events that can occur on a bike aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BikeEvent {
    /// The bike was added to the fleet.
    Provisioned(ProvisionedData),

    /// The bike was handed to a renter.
    RentedOut(RentedOutData),

    /// The bike was dropped off.
    Returned(ReturnedData),
}

impl BikeEvent {
    pub fn provisioned(location: impl Into<String>) -> Self {
        BikeEvent::Provisioned(ProvisionedData {
            location: location.into(),
        })
    }

    pub fn rented_out(renter: impl Into<String>) -> Self {
        BikeEvent::RentedOut(RentedOutData {
            renter: renter.into(),
        })
    }

    pub fn returned(location: impl Into<String>) -> Self {
        BikeEvent::Returned(ReturnedData {
            location: location.into(),
        })
    }
}

impl DomainEvent for BikeEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BikeEvent::Provisioned(_) => PROVISIONED,
            BikeEvent::RentedOut(_) => RENTED_OUT,
            BikeEvent::Returned(_) => RETURNED,
        }
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            BikeEvent::Provisioned(data) => serde_json::to_value(data),
            BikeEvent::RentedOut(data) => serde_json::to_value(data),
            BikeEvent::Returned(data) => serde_json::to_value(data),
        }
    }

    fn from_stored(event_type: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match event_type {
            PROVISIONED => BikeEvent::Provisioned(ProvisionedData::deserialize(payload)?),
            RENTED_OUT => BikeEvent::RentedOut(RentedOutData::deserialize(payload)?),
            RETURNED => BikeEvent::Returned(ReturnedData::deserialize(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Data for Provisioned event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedData {
    /// Where the bike starts out.
    pub location: String,
}

/// Data for RentedOut event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentedOutData {
    pub renter: String,
}

/// Data for Returned event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedData {
    /// Where the bike was dropped off.
    pub location: String,
}
