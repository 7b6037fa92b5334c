//! Bike status read model: one row per bike with its location and renter.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{Aggregate, Bike, BikeEvent, DomainEvent};
use event_store::{EventEnvelope, Sequence};

use crate::projection::{Applied, Projection, StreamPosition, stream_position};
use crate::read_model::{BikeStatus, BikeStatusRepository};
use crate::{ProjectionError, Result};

/// Projects bike events into [`BikeStatus`] rows.
///
/// `Provisioned` creates the row, `RentedOut` marks it rented, `Returned`
/// clears the renter and moves the bike. Event types this build does not know
/// only advance the row's sequence.
pub struct BikeStatusProjection<R> {
    repository: Arc<R>,
}

impl<R> Clone for BikeStatusProjection<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R: BikeStatusRepository> BikeStatusProjection<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// All rows, ordered by bike id.
    pub async fn list_all(&self) -> Result<Vec<BikeStatus>> {
        self.repository.list_all().await
    }

    pub async fn get_by_id(&self, id: &AggregateId) -> Result<Option<BikeStatus>> {
        self.repository.get(id).await
    }

    fn create(event: &EventEnvelope, decoded: Option<BikeEvent>) -> Result<BikeStatus> {
        let Some(BikeEvent::Provisioned(data)) = decoded else {
            return Err(ProjectionError::MissingRow {
                aggregate_id: event.aggregate_id.clone(),
                event_type: event.event_type.clone(),
            });
        };

        if event.sequence != Sequence::FIRST {
            return Err(ProjectionError::SequenceGap {
                aggregate_id: event.aggregate_id.clone(),
                expected: Sequence::FIRST,
                found: event.sequence,
            });
        }

        Ok(BikeStatus::provisioned(
            event.aggregate_id.clone(),
            data.location,
            event.sequence,
        ))
    }

    fn update(mut row: BikeStatus, event: &EventEnvelope, decoded: Option<BikeEvent>) -> BikeStatus {
        match decoded {
            Some(BikeEvent::Provisioned(data)) => {
                row.location = data.location;
                row.rented = false;
                row.renter = None;
            }
            Some(BikeEvent::RentedOut(data)) => {
                row.rented = true;
                row.renter = Some(data.renter);
            }
            Some(BikeEvent::Returned(data)) => {
                row.rented = false;
                row.renter = None;
                row.location = data.location;
            }
            None => {}
        }
        row.sequence = event.sequence;
        row
    }
}

#[async_trait]
impl<R: BikeStatusRepository + 'static> Projection for BikeStatusProjection<R> {
    fn name(&self) -> &'static str {
        "BikeStatus"
    }

    async fn apply(&self, event: &EventEnvelope) -> Result<Applied> {
        if event.aggregate_type != Bike::aggregate_type() {
            return Ok(Applied::Ignored);
        }

        let existing = self.repository.get(&event.aggregate_id).await?;
        if let Some(row) = &existing
            && stream_position(row.sequence, event)? == StreamPosition::Duplicate
        {
            return Ok(Applied::Duplicate);
        }

        let decoded = BikeEvent::from_stored(&event.event_type, &event.payload)?;
        let row = match existing {
            None => Self::create(event, decoded)?,
            Some(row) => Self::update(row, event, decoded),
        };

        tracing::debug!(
            bike_id = %row.id,
            sequence = %row.sequence,
            rented = row.rented,
            "Bike status updated"
        );
        self.repository.upsert(row).await?;
        Ok(Applied::Applied)
    }

    async fn reset(&self) -> Result<()> {
        self.repository.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryBikeStatusRepository;
    use event_store::NewEvent;

    fn envelope(id: &str, sequence: i64, event: &BikeEvent) -> EventEnvelope {
        NewEvent::new("Bike", event.event_type(), event.to_payload().unwrap())
            .into_envelope(AggregateId::from(id), Sequence::new(sequence))
    }

    fn projection() -> BikeStatusProjection<InMemoryBikeStatusRepository> {
        BikeStatusProjection::new(Arc::new(InMemoryBikeStatusRepository::new()))
    }

    #[tokio::test]
    async fn provisioned_creates_row() {
        let projection = projection();

        let applied = projection
            .apply(&envelope("1", 0, &BikeEvent::provisioned("X")))
            .await
            .unwrap();

        assert_eq!(applied, Applied::Applied);
        let row = projection.get_by_id(&AggregateId::from("1")).await.unwrap().unwrap();
        assert_eq!(row.location, "X");
        assert!(!row.rented);
        assert_eq!(row.renter, None);
    }

    #[tokio::test]
    async fn rent_and_return_update_row() {
        let projection = projection();
        projection
            .apply(&envelope("1", 0, &BikeEvent::provisioned("X")))
            .await
            .unwrap();
        projection
            .apply(&envelope("1", 1, &BikeEvent::rented_out("alice")))
            .await
            .unwrap();

        let row = projection.get_by_id(&AggregateId::from("1")).await.unwrap().unwrap();
        assert!(row.rented);
        assert_eq!(row.renter.as_deref(), Some("alice"));
        assert_eq!(row.location, "X");

        projection
            .apply(&envelope("1", 2, &BikeEvent::returned("Y")))
            .await
            .unwrap();

        let row = projection.get_by_id(&AggregateId::from("1")).await.unwrap().unwrap();
        assert!(!row.rented);
        assert_eq!(row.renter, None);
        assert_eq!(row.location, "Y");
        assert_eq!(row.sequence, Sequence::new(2));
    }

    #[tokio::test]
    async fn redelivery_leaves_row_unchanged() {
        let projection = projection();
        let provisioned = envelope("1", 0, &BikeEvent::provisioned("X"));
        let rented = envelope("1", 1, &BikeEvent::rented_out("alice"));
        projection.apply(&provisioned).await.unwrap();
        projection.apply(&rented).await.unwrap();
        let before = projection.get_by_id(&AggregateId::from("1")).await.unwrap();

        assert_eq!(projection.apply(&rented).await.unwrap(), Applied::Duplicate);
        assert_eq!(projection.apply(&provisioned).await.unwrap(), Applied::Duplicate);

        let after = projection.get_by_id(&AggregateId::from("1")).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn update_without_row_is_reported() {
        let projection = projection();

        let err = projection
            .apply(&envelope("1", 1, &BikeEvent::rented_out("alice")))
            .await
            .unwrap_err();

        assert!(matches!(err, ProjectionError::MissingRow { .. }));
        assert!(projection.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn gap_is_reported() {
        let projection = projection();
        projection
            .apply(&envelope("1", 0, &BikeEvent::provisioned("X")))
            .await
            .unwrap();

        let err = projection
            .apply(&envelope("1", 2, &BikeEvent::returned("Y")))
            .await
            .unwrap_err();

        assert!(matches!(err, ProjectionError::SequenceGap { .. }));
    }

    #[tokio::test]
    async fn unknown_event_type_advances_sequence_only() {
        let projection = projection();
        projection
            .apply(&envelope("1", 0, &BikeEvent::provisioned("X")))
            .await
            .unwrap();

        let serviced = NewEvent::new("Bike", "Serviced", serde_json::json!({}))
            .into_envelope(AggregateId::from("1"), Sequence::new(1));
        assert_eq!(projection.apply(&serviced).await.unwrap(), Applied::Applied);

        let row = projection.get_by_id(&AggregateId::from("1")).await.unwrap().unwrap();
        assert_eq!(row.sequence, Sequence::new(1));
        assert_eq!(row.location, "X");
    }

    #[tokio::test]
    async fn other_aggregate_types_are_ignored() {
        let projection = projection();
        let event = NewEvent::new("Dock", "Opened", serde_json::json!({}))
            .into_envelope(AggregateId::from("d"), Sequence::FIRST);

        assert_eq!(projection.apply(&event).await.unwrap(), Applied::Ignored);
        assert!(projection.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_clears_rows() {
        let projection = projection();
        projection
            .apply(&envelope("1", 0, &BikeEvent::provisioned("X")))
            .await
            .unwrap();

        projection.reset().await.unwrap();

        assert!(projection.list_all().await.unwrap().is_empty());
    }
}
