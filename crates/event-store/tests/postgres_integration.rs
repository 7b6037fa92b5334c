//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use event_store::{
    AggregateId, CORRELATION_ID_KEY, EventQuery, EventStore, EventStoreError, EventStoreExt,
    NewEvent, PostgresEventStore, Sequence,
};
use futures_util::StreamExt;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_events_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn new_event(event_type: &str) -> NewEvent {
    NewEvent::new("TestAggregate", event_type, serde_json::json!({"test": true}))
}

#[tokio::test]
async fn append_and_load_events() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let committed = store
        .append(&id, Sequence::NONE, vec![new_event("TestEvent")])
        .await
        .unwrap();
    assert_eq!(committed[0].sequence, Sequence::FIRST);

    let events = store.load_all(&id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "TestEvent");
    assert_eq!(events[0].sequence, Sequence::FIRST);
}

#[tokio::test]
async fn append_multiple_events_atomically() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    store
        .append(
            &id,
            Sequence::NONE,
            vec![new_event("Event1"), new_event("Event2"), new_event("Event3")],
        )
        .await
        .unwrap();

    let stored = store.load_all(&id).await.unwrap();
    let sequences: Vec<i64> = stored.iter().map(|e| e.sequence.as_i64()).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}

#[tokio::test]
async fn optimistic_concurrency_conflict() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    store
        .append(&id, Sequence::NONE, vec![new_event("Event1")])
        .await
        .unwrap();

    let result = store
        .append(&id, Sequence::NONE, vec![new_event("Event2")])
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
    assert_eq!(store.current_sequence(&id).await.unwrap(), Sequence::FIRST);
}

#[tokio::test]
async fn concurrent_appends_admit_exactly_one_writer() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let (a, b) = tokio::join!(
        store.append(&id, Sequence::NONE, vec![new_event("A")]),
        store.append(&id, Sequence::NONE, vec![new_event("B")]),
    );

    assert_eq!(
        [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
        1
    );
    assert_eq!(store.load_all(&id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn load_from_sequence() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    store
        .append(
            &id,
            Sequence::NONE,
            vec![new_event("Event1"), new_event("Event2"), new_event("Event3")],
        )
        .await
        .unwrap();

    let tail: Vec<_> = store
        .load_from(&id, Sequence::new(1))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].as_ref().unwrap().sequence, Sequence::new(1));
    assert_eq!(tail[1].as_ref().unwrap().sequence, Sequence::new(2));
}

#[tokio::test]
async fn query_events_with_filters() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    store
        .append(
            &id,
            Sequence::NONE,
            vec![new_event("Event1"), new_event("Event2"), new_event("Event3")],
        )
        .await
        .unwrap();

    let query = EventQuery::for_aggregate(id.clone())
        .from_sequence(Sequence::new(1))
        .to_sequence(Sequence::new(1));

    let results = store.query_events(query).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].event_type, "Event2");

    let by_type = store
        .query_events(EventQuery::for_event_type("Event3"))
        .await
        .unwrap();
    assert_eq!(by_type.len(), 1);
}

#[tokio::test]
async fn stream_all_in_commit_order() {
    let store = get_test_store().await;
    let id1 = AggregateId::new();
    let id2 = AggregateId::new();

    store
        .append(&id1, Sequence::NONE, vec![new_event("Event1")])
        .await
        .unwrap();
    store
        .append(&id2, Sequence::NONE, vec![new_event("Event2")])
        .await
        .unwrap();
    store
        .append(&id1, Sequence::FIRST, vec![new_event("Event3")])
        .await
        .unwrap();

    let events: Vec<_> = store.stream_all().await.unwrap().collect().await;
    let types: Vec<String> = events
        .into_iter()
        .map(|e| e.unwrap().event_type)
        .collect();
    assert_eq!(types, vec!["Event1", "Event2", "Event3"]);
}

#[tokio::test]
async fn metadata_round_trips_for_correlation_lookup() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    store
        .append(
            &id,
            Sequence::NONE,
            vec![new_event("Event1").with_metadata(CORRELATION_ID_KEY, serde_json::json!("c-1"))],
        )
        .await
        .unwrap();

    let found = store.find_by_correlation(&id, "c-1").await.unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn stream_all_yields_everything_committed_before_it_started() {
    let store = get_test_store().await;
    let mut before = Vec::new();
    for _ in 0..3 {
        let id = AggregateId::new();
        let batch = (0..300).map(|_| new_event("Before")).collect();
        before.extend(store.append(&id, Sequence::NONE, batch).await.unwrap());
    }

    let mut stream = store.stream_all().await.unwrap();
    let first = stream.next().await.unwrap().unwrap();

    // Appended while the stream is open; it may or may not be seen.
    store
        .append(&AggregateId::new(), Sequence::NONE, vec![new_event("During")])
        .await
        .unwrap();

    let mut seen = vec![first];
    while let Some(event) = stream.next().await {
        seen.push(event.unwrap());
    }

    let seen_before: Vec<_> = seen
        .iter()
        .filter(|e| e.event_type == "Before")
        .map(|e| e.event_id)
        .collect();
    let expected: Vec<_> = before.iter().map(|e| e.event_id).collect();
    assert_eq!(seen_before, expected);
    assert!(seen.iter().filter(|e| e.event_type == "During").count() <= 1);
}
