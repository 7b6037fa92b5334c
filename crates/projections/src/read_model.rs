//! Read model rows and their storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use event_store::Sequence;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;

/// Current status of one bike, as served to queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BikeStatus {
    pub id: AggregateId,
    pub location: String,
    pub rented: bool,
    pub renter: Option<String>,

    /// Last event applied to this row.
    #[serde(skip)]
    pub sequence: Sequence,
}

impl BikeStatus {
    /// A freshly provisioned bike.
    pub fn provisioned(id: AggregateId, location: impl Into<String>, sequence: Sequence) -> Self {
        Self {
            id,
            location: location.into(),
            rented: false,
            renter: None,
            sequence,
        }
    }
}

/// Storage for [`BikeStatus`] rows.
///
/// The row and its sequence are written together, so a row can never reflect
/// an event its checkpoint does not.
#[async_trait]
pub trait BikeStatusRepository: Send + Sync {
    /// Inserts or replaces the row for `row.id`.
    async fn upsert(&self, row: BikeStatus) -> Result<()>;

    async fn get(&self, id: &AggregateId) -> Result<Option<BikeStatus>>;

    /// All rows, ordered by id.
    async fn list_all(&self) -> Result<Vec<BikeStatus>>;

    async fn clear(&self) -> Result<()>;
}

/// In-memory [`BikeStatusRepository`].
#[derive(Clone, Default)]
pub struct InMemoryBikeStatusRepository {
    rows: Arc<RwLock<BTreeMap<AggregateId, BikeStatus>>>,
}

impl InMemoryBikeStatusRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows.
    pub async fn count(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl BikeStatusRepository for InMemoryBikeStatusRepository {
    async fn upsert(&self, row: BikeStatus) -> Result<()> {
        self.rows.write().await.insert(row.id.clone(), row);
        Ok(())
    }

    async fn get(&self, id: &AggregateId) -> Result<Option<BikeStatus>> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<BikeStatus>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.rows.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_replaces_row() {
        let repo = InMemoryBikeStatusRepository::new();
        let id = AggregateId::from("1");

        repo.upsert(BikeStatus::provisioned(id.clone(), "X", Sequence::FIRST))
            .await
            .unwrap();
        let mut row = repo.get(&id).await.unwrap().unwrap();
        row.location = "Y".to_string();
        repo.upsert(row).await.unwrap();

        assert_eq!(repo.get(&id).await.unwrap().unwrap().location, "Y");
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn list_all_is_ordered_by_id() {
        let repo = InMemoryBikeStatusRepository::new();
        for id in ["c", "a", "b"] {
            repo.upsert(BikeStatus::provisioned(AggregateId::from(id), "X", Sequence::FIRST))
                .await
                .unwrap();
        }

        let ids: Vec<_> = repo
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.id.into_inner())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn serialized_row_omits_sequence() {
        let row = BikeStatus::provisioned(AggregateId::from("1"), "X", Sequence::new(4));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "id": "1", "location": "X", "rented": false, "renter": null })
        );
    }
}
