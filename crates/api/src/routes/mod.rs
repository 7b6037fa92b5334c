//! HTTP route handlers.

pub mod bikes;
pub mod commands;
pub mod health;
pub mod metrics;
pub mod status;

pub use bikes::AppState;
