//! Bike aggregate and related types.

mod aggregate;
pub mod commands;
pub mod events;
mod service;
mod state;

pub use aggregate::Bike;
pub use commands::BikeCommand;
pub use events::{BikeEvent, ProvisionedData, RentedOutData, ReturnedData};
pub use service::BikeService;
pub use state::BikeState;
