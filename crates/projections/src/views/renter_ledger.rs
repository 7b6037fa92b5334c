//! Renter ledger read model: which bikes each renter holds.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{Aggregate, Bike, BikeEvent, DomainEvent};
use event_store::{EventEnvelope, Sequence};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Applied, Projection, StreamPosition, stream_position};

/// Rental activity for one renter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenterSummary {
    pub renter: String,
    pub bikes_held: BTreeSet<AggregateId>,
    pub total_rentals: u64,
}

#[derive(Default)]
struct Ledger {
    checkpoints: HashMap<AggregateId, Sequence>,
    holders: HashMap<AggregateId, String>,
    renters: BTreeMap<String, RenterSummary>,
}

/// Read model view keyed by renter.
#[derive(Clone, Default)]
pub struct RenterLedgerView {
    ledger: Arc<RwLock<Ledger>>,
}

impl RenterLedgerView {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the summary for one renter.
    pub async fn get_renter(&self, renter: &str) -> Option<RenterSummary> {
        self.ledger.read().await.renters.get(renter).cloned()
    }

    /// All renters seen so far, ordered by name.
    pub async fn all_renters(&self) -> Vec<RenterSummary> {
        self.ledger.read().await.renters.values().cloned().collect()
    }

    /// Who currently holds a bike.
    pub async fn holder_of(&self, bike_id: &AggregateId) -> Option<String> {
        self.ledger.read().await.holders.get(bike_id).cloned()
    }

    /// Number of bikes currently rented out.
    pub async fn active_rentals(&self) -> usize {
        self.ledger.read().await.holders.len()
    }
}

#[async_trait]
impl Projection for RenterLedgerView {
    fn name(&self) -> &'static str {
        "RenterLedger"
    }

    async fn apply(&self, event: &EventEnvelope) -> Result<Applied> {
        if event.aggregate_type != Bike::aggregate_type() {
            return Ok(Applied::Ignored);
        }

        let mut ledger = self.ledger.write().await;
        let last = ledger
            .checkpoints
            .get(&event.aggregate_id)
            .copied()
            .unwrap_or(Sequence::NONE);
        if stream_position(last, event)? == StreamPosition::Duplicate {
            return Ok(Applied::Duplicate);
        }

        let bike_id = event.aggregate_id.clone();
        match BikeEvent::from_stored(&event.event_type, &event.payload)? {
            Some(BikeEvent::RentedOut(data)) => {
                let summary = ledger
                    .renters
                    .entry(data.renter.clone())
                    .or_insert_with(|| RenterSummary {
                        renter: data.renter.clone(),
                        ..Default::default()
                    });
                summary.bikes_held.insert(bike_id.clone());
                summary.total_rentals += 1;
                ledger.holders.insert(bike_id.clone(), data.renter);
            }
            Some(BikeEvent::Returned(_)) => {
                if let Some(renter) = ledger.holders.remove(&bike_id)
                    && let Some(summary) = ledger.renters.get_mut(&renter)
                {
                    summary.bikes_held.remove(&bike_id);
                }
            }
            Some(BikeEvent::Provisioned(_)) | None => {}
        }

        ledger.checkpoints.insert(bike_id, event.sequence);
        Ok(Applied::Applied)
    }

    async fn reset(&self) -> Result<()> {
        *self.ledger.write().await = Ledger::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::NewEvent;

    fn envelope(id: &str, sequence: i64, event: &BikeEvent) -> EventEnvelope {
        NewEvent::new("Bike", event.event_type(), event.to_payload().unwrap())
            .into_envelope(AggregateId::from(id), Sequence::new(sequence))
    }

    async fn rent_and_return(view: &RenterLedgerView, id: &str, renter: &str) {
        view.apply(&envelope(id, 0, &BikeEvent::provisioned("X")))
            .await
            .unwrap();
        view.apply(&envelope(id, 1, &BikeEvent::rented_out(renter)))
            .await
            .unwrap();
        view.apply(&envelope(id, 2, &BikeEvent::returned("Y")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tracks_bikes_held() {
        let view = RenterLedgerView::new();
        view.apply(&envelope("1", 0, &BikeEvent::provisioned("X")))
            .await
            .unwrap();
        view.apply(&envelope("1", 1, &BikeEvent::rented_out("alice")))
            .await
            .unwrap();

        let alice = view.get_renter("alice").await.unwrap();
        assert!(alice.bikes_held.contains(&AggregateId::from("1")));
        assert_eq!(alice.total_rentals, 1);
        assert_eq!(view.holder_of(&AggregateId::from("1")).await.as_deref(), Some("alice"));
        assert_eq!(view.active_rentals().await, 1);
    }

    #[tokio::test]
    async fn return_releases_bike_but_keeps_history() {
        let view = RenterLedgerView::new();
        rent_and_return(&view, "1", "alice").await;
        rent_and_return(&view, "2", "alice").await;

        let alice = view.get_renter("alice").await.unwrap();
        assert!(alice.bikes_held.is_empty());
        assert_eq!(alice.total_rentals, 2);
        assert_eq!(view.active_rentals().await, 0);
    }

    #[tokio::test]
    async fn redelivered_rental_is_not_double_counted() {
        let view = RenterLedgerView::new();
        let rented = envelope("1", 1, &BikeEvent::rented_out("alice"));
        view.apply(&envelope("1", 0, &BikeEvent::provisioned("X")))
            .await
            .unwrap();
        view.apply(&rented).await.unwrap();

        assert_eq!(view.apply(&rented).await.unwrap(), Applied::Duplicate);
        assert_eq!(view.get_renter("alice").await.unwrap().total_rentals, 1);
    }

    #[tokio::test]
    async fn reset_forgets_everything() {
        let view = RenterLedgerView::new();
        rent_and_return(&view, "1", "alice").await;

        view.reset().await.unwrap();

        assert!(view.all_renters().await.is_empty());
        // Replaying from the start is accepted again.
        rent_and_return(&view, "1", "alice").await;
        assert_eq!(view.get_renter("alice").await.unwrap().total_rentals, 1);
    }
}
