//! Read model views.

mod bike_status;
mod renter_ledger;

pub use bike_status::BikeStatusProjection;
pub use renter_ledger::{RenterLedgerView, RenterSummary};
