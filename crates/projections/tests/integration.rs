//! Integration tests: router commands → projection publisher → read models.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use domain::{Bike, BikeService, CommandRouter, RouterConfig};
use event_store::{EventEnvelope, EventPublisher, EventStoreExt, InMemoryEventStore};
use projections::{
    Applied, BikeStatus, BikeStatusProjection, BikeStatusRepository, InMemoryBikeStatusRepository,
    Projection, ProjectionError, ProjectionPublisher, PublisherConfig, RenterLedgerView,
};

struct Harness {
    service: BikeService<InMemoryEventStore>,
    publisher: Arc<ProjectionPublisher>,
    status: BikeStatusProjection<InMemoryBikeStatusRepository>,
    ledger: RenterLedgerView,
}

fn fast_config() -> PublisherConfig {
    PublisherConfig {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Helper to wire a store, router, publisher, and both views.
fn setup_with(extra: Vec<Arc<dyn Projection>>) -> Harness {
    let status = BikeStatusProjection::new(Arc::new(InMemoryBikeStatusRepository::new()));
    let ledger = RenterLedgerView::new();

    let mut projections: Vec<Arc<dyn Projection>> =
        vec![Arc::new(status.clone()), Arc::new(ledger.clone())];
    projections.extend(extra);
    let publisher = Arc::new(ProjectionPublisher::start(fast_config(), projections));

    let router: CommandRouter<_, Bike> = CommandRouter::with_parts(
        InMemoryEventStore::new(),
        publisher.clone(),
        RouterConfig::default(),
    );

    Harness {
        service: BikeService::with_router(router),
        publisher,
        status,
        ledger,
    }
}

fn setup() -> Harness {
    setup_with(Vec::new())
}

fn bike(id: &str) -> AggregateId {
    AggregateId::from(id)
}

async fn row(harness: &Harness, id: &str) -> BikeStatus {
    harness
        .status
        .get_by_id(&bike(id))
        .await
        .unwrap()
        .expect("row should exist")
}

/// Projection that rejects every event.
struct Broken;

#[async_trait]
impl Projection for Broken {
    fn name(&self) -> &'static str {
        "Broken"
    }

    async fn apply(&self, event: &EventEnvelope) -> projections::Result<Applied> {
        Err(ProjectionError::MissingRow {
            aggregate_id: event.aggregate_id.clone(),
            event_type: event.event_type.clone(),
        })
    }

    async fn reset(&self) -> projections::Result<()> {
        Ok(())
    }
}

/// Repository that can be switched offline.
#[derive(Default)]
struct OutageRepository {
    inner: InMemoryBikeStatusRepository,
    down: AtomicBool,
}

impl OutageRepository {
    fn check(&self) -> projections::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ProjectionError::StoreUnavailable("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BikeStatusRepository for OutageRepository {
    async fn upsert(&self, row: BikeStatus) -> projections::Result<()> {
        self.check()?;
        self.inner.upsert(row).await
    }

    async fn get(&self, id: &AggregateId) -> projections::Result<Option<BikeStatus>> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn list_all(&self) -> projections::Result<Vec<BikeStatus>> {
        self.check()?;
        self.inner.list_all().await
    }

    async fn clear(&self) -> projections::Result<()> {
        self.check()?;
        self.inner.clear().await
    }
}

#[tokio::test]
async fn scenario_a_provision_creates_available_row() {
    let harness = setup();

    harness.service.provision_with_id(bike("1"), "X").await.unwrap();
    harness.publisher.wait_idle().await;

    let row = row(&harness, "1").await;
    assert_eq!(row.location, "X");
    assert!(!row.rented);
    assert_eq!(row.renter, None);
}

#[tokio::test]
async fn scenario_b_rent_out_marks_row_rented() {
    let harness = setup();

    harness.service.provision_with_id(bike("1"), "X").await.unwrap();
    harness.service.rent_out(bike("1"), "alice").await.unwrap();
    harness.publisher.wait_idle().await;

    let row = row(&harness, "1").await;
    assert!(row.rented);
    assert_eq!(row.renter.as_deref(), Some("alice"));

    let alice = harness.ledger.get_renter("alice").await.unwrap();
    assert_eq!(alice.total_rentals, 1);
}

#[tokio::test]
async fn scenario_e_return_clears_renter_and_moves_bike() {
    let harness = setup();

    harness.service.provision_with_id(bike("1"), "X").await.unwrap();
    harness.service.rent_out(bike("1"), "alice").await.unwrap();
    harness.service.return_bike(bike("1"), "Y").await.unwrap();
    harness.publisher.wait_idle().await;

    let row = row(&harness, "1").await;
    assert_eq!(row.location, "Y");
    assert!(!row.rented);
    assert_eq!(row.renter, None);
    assert_eq!(harness.ledger.active_rentals().await, 0);
}

#[tokio::test]
async fn rejected_command_leaves_read_model_untouched() {
    let harness = setup();

    harness.service.provision_with_id(bike("1"), "X").await.unwrap();
    harness.service.rent_out(bike("1"), "alice").await.unwrap();
    harness.service.rent_out(bike("1"), "bob").await.unwrap_err();
    harness.publisher.wait_idle().await;

    assert_eq!(row(&harness, "1").await.renter.as_deref(), Some("alice"));
    assert!(harness.ledger.get_renter("bob").await.is_none());
}

#[tokio::test]
async fn redelivering_the_whole_log_changes_nothing() {
    let harness = setup();
    harness.service.provision_with_id(bike("1"), "X").await.unwrap();
    harness.service.rent_out(bike("1"), "alice").await.unwrap();
    harness.service.provision_with_id(bike("2"), "Z").await.unwrap();
    harness.publisher.wait_idle().await;
    let before = harness.status.list_all().await.unwrap();

    let store = harness.service.router().store();
    let events = store.load_all(&bike("1")).await.unwrap();
    harness.publisher.publish(&events).await;
    harness.publisher.catch_up(store).await.unwrap();
    harness.publisher.wait_idle().await;

    assert_eq!(harness.status.list_all().await.unwrap(), before);
    assert_eq!(harness.ledger.get_renter("alice").await.unwrap().total_rentals, 1);
    assert!(harness.publisher.failures().await.is_empty());
}

#[tokio::test]
async fn list_all_is_ordered_by_id() {
    let harness = setup();
    for id in ["3", "1", "2"] {
        harness.service.provision_with_id(bike(id), "X").await.unwrap();
    }
    harness.publisher.wait_idle().await;

    let ids: Vec<_> = harness
        .status
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.id.into_inner())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn failing_projection_is_isolated() {
    let harness = setup_with(vec![Arc::new(Broken)]);

    // Commands still succeed while one projection rejects everything.
    harness.service.provision_with_id(bike("1"), "X").await.unwrap();
    harness.service.rent_out(bike("1"), "alice").await.unwrap();
    harness.publisher.wait_idle().await;

    assert!(row(&harness, "1").await.rented);

    let failures = harness.publisher.failures().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].projection, "Broken");
    assert_eq!(failures[0].occurrences, 2);
}

#[tokio::test]
async fn read_model_outage_is_retried_until_it_recovers() {
    let repository = Arc::new(OutageRepository::default());
    let status = BikeStatusProjection::new(repository.clone());
    let publisher = Arc::new(ProjectionPublisher::start(
        fast_config(),
        vec![Arc::new(status.clone())],
    ));
    let router: CommandRouter<_, Bike> = CommandRouter::with_parts(
        InMemoryEventStore::new(),
        publisher.clone(),
        RouterConfig::default(),
    );
    let service = BikeService::with_router(router);

    repository.down.store(true, Ordering::SeqCst);
    service.provision_with_id(bike("1"), "X").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(publisher.pending(), 1);

    repository.down.store(false, Ordering::SeqCst);
    publisher.wait_idle().await;

    assert_eq!(
        status.get_by_id(&bike("1")).await.unwrap().unwrap().location,
        "X"
    );
    assert!(publisher.failures().await.is_empty());
}

#[tokio::test]
async fn rebuild_restores_views_from_the_log() {
    let harness = setup();
    harness.service.provision_with_id(bike("1"), "X").await.unwrap();
    harness.service.rent_out(bike("1"), "alice").await.unwrap();
    harness.service.return_bike(bike("1"), "Y").await.unwrap();
    harness.publisher.wait_idle().await;
    let before = harness.status.list_all().await.unwrap();

    harness
        .publisher
        .rebuild(harness.service.router().store())
        .await
        .unwrap();
    harness.publisher.wait_idle().await;

    assert_eq!(harness.status.list_all().await.unwrap(), before);
    assert_eq!(harness.ledger.get_renter("alice").await.unwrap().total_rentals, 1);
}

#[tokio::test]
async fn catch_up_fills_a_late_projection() {
    let store = InMemoryEventStore::new();
    let service = BikeService::new(store.clone());
    service.provision_with_id(bike("1"), "X").await.unwrap();
    service.rent_out(bike("1"), "alice").await.unwrap();

    let status = BikeStatusProjection::new(Arc::new(InMemoryBikeStatusRepository::new()));
    let publisher = ProjectionPublisher::start(fast_config(), vec![Arc::new(status.clone())]);
    assert_eq!(publisher.catch_up(&store).await.unwrap(), 2);
    publisher.wait_idle().await;

    let row = status.get_by_id(&bike("1")).await.unwrap().unwrap();
    assert!(row.rented);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rentals_project_consistently() {
    let harness = setup();
    harness.service.provision_with_id(bike("1"), "X").await.unwrap();

    let renters = ["alice", "bob", "carol", "dave"];
    let attempts = renters.iter().map(|renter| {
        let service = harness.service.clone();
        async move { service.rent_out(bike("1"), renter).await }
    });
    let results = futures_util::future::join_all(attempts).await;
    harness.publisher.wait_idle().await;

    let winners: Vec<_> = results
        .into_iter()
        .filter_map(|r| r.ok())
        .map(|outcome| outcome.aggregate.renter().map(str::to_string))
        .collect();
    assert_eq!(winners.len(), 1);

    let row = row(&harness, "1").await;
    assert_eq!(row.renter, winners[0]);
}
