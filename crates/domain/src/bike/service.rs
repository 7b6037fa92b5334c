//! Bike service providing a simplified API for rental operations.

use common::AggregateId;
use event_store::EventStore;

use crate::command::{Command, CommandOutcome};
use crate::error::DomainError;
use crate::router::CommandRouter;

use super::{Bike, BikeCommand};

/// Service for managing the bike fleet.
///
/// Every operation goes through [`CommandRouter::submit`], so a caller that
/// stops waiting never interrupts an append in progress.
pub struct BikeService<S: EventStore> {
    router: CommandRouter<S, Bike>,
}

impl<S: EventStore> Clone for BikeService<S> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
        }
    }
}

impl<S: EventStore + 'static> BikeService<S> {
    /// Creates a new bike service with the given event store.
    pub fn new(store: S) -> Self {
        Self::with_router(CommandRouter::new(store))
    }

    pub fn with_router(router: CommandRouter<S, Bike>) -> Self {
        Self { router }
    }

    /// Returns a reference to the underlying command router.
    pub fn router(&self) -> &CommandRouter<S, Bike> {
        &self.router
    }

    /// Provisions a bike under a freshly generated identity.
    #[tracing::instrument(skip(self))]
    pub async fn provision(&self, location: &str) -> Result<CommandOutcome<Bike>, DomainError> {
        self.provision_with_id(AggregateId::new(), location).await
    }

    /// Provisions a bike under a caller-chosen identity.
    #[tracing::instrument(skip(self))]
    pub async fn provision_with_id(
        &self,
        bike_id: AggregateId,
        location: &str,
    ) -> Result<CommandOutcome<Bike>, DomainError> {
        self.dispatch(bike_id, BikeCommand::provision(location))
            .await
    }

    /// Rents a bike out to a renter.
    #[tracing::instrument(skip(self))]
    pub async fn rent_out(
        &self,
        bike_id: AggregateId,
        renter: &str,
    ) -> Result<CommandOutcome<Bike>, DomainError> {
        self.dispatch(bike_id, BikeCommand::rent_out(renter)).await
    }

    /// Returns a rented bike at a location.
    #[tracing::instrument(skip(self))]
    pub async fn return_bike(
        &self,
        bike_id: AggregateId,
        location: &str,
    ) -> Result<CommandOutcome<Bike>, DomainError> {
        self.dispatch(bike_id, BikeCommand::return_to(location))
            .await
    }

    /// Gets a bike by ID.
    pub async fn get_bike(&self, bike_id: &AggregateId) -> Result<Option<Bike>, DomainError> {
        self.router.load(bike_id).await
    }

    async fn dispatch(
        &self,
        bike_id: AggregateId,
        command: BikeCommand,
    ) -> Result<CommandOutcome<Bike>, DomainError> {
        self.router.submit(Command::new(bike_id, command)).wait().await
    }
}
