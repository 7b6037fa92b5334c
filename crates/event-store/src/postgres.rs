use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::{TryStreamExt, stream};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventQuery, EventStoreError, NewEvent, Result, Sequence,
    store::{EventStore, EventStream, validate_new_events},
};

const SELECT_COLUMNS: &str =
    "id, event_type, aggregate_id, aggregate_type, sequence, timestamp, payload, metadata";

const PAGE_SIZE: i64 = 500;

const AGGREGATE_PAGE_SQL: &str = r#"
    SELECT global_position, id, event_type, aggregate_id, aggregate_type, sequence, timestamp, payload, metadata
    FROM events
    WHERE aggregate_id = $1 AND sequence >= $2
    ORDER BY sequence ASC
    LIMIT $3
"#;

// `global_position` is taken at insert time, not at commit, so a page can move
// past a position whose transaction commits later. Rows committed before the
// stream was opened are all visible to every page; only appends racing the
// read can be skipped, and their writers publish them live.
const GLOBAL_PAGE_SQL: &str = r#"
    SELECT global_position, id, event_type, aggregate_id, aggregate_type, sequence, timestamp, payload, metadata
    FROM events
    WHERE global_position > $1
    ORDER BY global_position ASC
    LIMIT $2
"#;

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from(row.try_get::<String, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            sequence: Sequence::new(row.try_get("sequence")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }

    /// Streams rows page by page so large streams are never fully buffered.
    ///
    /// Pages are keyed on the last row seen, so a stream only ever moves forward.
    fn paged(pool: PgPool, cursor: Cursor) -> EventStream {
        let pages = stream::try_unfold(Some((pool, cursor)), |state| async move {
            let Some((pool, cursor)) = state else {
                return Ok::<_, EventStoreError>(None);
            };

            let rows = match &cursor {
                Cursor::Aggregate { aggregate_id, next } => {
                    sqlx::query(AGGREGATE_PAGE_SQL)
                        .bind(aggregate_id.as_str())
                        .bind(*next)
                        .bind(PAGE_SIZE)
                        .fetch_all(&pool)
                        .await?
                }
                Cursor::Global { after } => {
                    sqlx::query(GLOBAL_PAGE_SQL)
                        .bind(*after)
                        .bind(PAGE_SIZE)
                        .fetch_all(&pool)
                        .await?
                }
            };

            let exhausted = (rows.len() as i64) < PAGE_SIZE;
            let mut events = Vec::with_capacity(rows.len());
            let mut last_position = None;
            for row in rows {
                last_position = Some(row.try_get::<i64, _>("global_position")?);
                events.push(Self::row_to_event(row)?);
            }

            let next_cursor = match cursor {
                Cursor::Aggregate { aggregate_id, next } => Cursor::Aggregate {
                    next: events
                        .last()
                        .map(|e| e.sequence.as_i64() + 1)
                        .unwrap_or(next),
                    aggregate_id,
                },
                Cursor::Global { after } => Cursor::Global {
                    after: last_position.unwrap_or(after),
                },
            };

            let next_state = (!exhausted).then_some((pool, next_cursor));
            Ok::<_, EventStoreError>(Some((events, next_state)))
        });

        Box::pin(
            pages
                .map_ok(|events| {
                    stream::iter(events.into_iter().map(Ok::<_, EventStoreError>))
                })
                .try_flatten(),
        )
    }
}

/// Resume point for a paged read.
enum Cursor {
    Aggregate { aggregate_id: String, next: i64 },
    Global { after: i64 },
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        expected: Sequence,
        events: Vec<NewEvent>,
    ) -> Result<Vec<EventEnvelope>> {
        validate_new_events(&events)?;

        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_str())
                .fetch_one(&mut *tx)
                .await?;
        let actual = current.map(Sequence::new).unwrap_or(Sequence::NONE);

        if actual != expected {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: aggregate_id.clone(),
                expected,
                actual,
            });
        }

        let mut envelopes = Vec::with_capacity(events.len());
        let mut sequence = expected;
        for event in events {
            sequence = sequence.next();
            let envelope = event.into_envelope(aggregate_id.clone(), sequence);
            let metadata_json = serde_json::to_value(&envelope.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, sequence, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(envelope.event_id.as_uuid())
            .bind(&envelope.event_type)
            .bind(envelope.aggregate_id.as_str())
            .bind(&envelope.aggregate_type)
            .bind(envelope.sequence.as_i64())
            .bind(envelope.timestamp)
            .bind(&envelope.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // A racing writer committed the same sequence between our read and insert
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_aggregate_sequence")
                {
                    return EventStoreError::ConcurrencyConflict {
                        aggregate_id: aggregate_id.clone(),
                        expected,
                        actual: envelope.sequence,
                    };
                }
                EventStoreError::Database(e)
            })?;

            envelopes.push(envelope);
        }

        tx.commit().await?;

        metrics::counter!("event_store_events_appended_total").increment(envelopes.len() as u64);

        Ok(envelopes)
    }

    async fn load_from(&self, aggregate_id: &AggregateId, from: Sequence) -> Result<EventStream> {
        Ok(Self::paged(
            self.pool.clone(),
            Cursor::Aggregate {
                aggregate_id: aggregate_id.as_str().to_owned(),
                next: from.as_i64().max(0),
            },
        ))
    }

    async fn current_sequence(&self, aggregate_id: &AggregateId) -> Result<Sequence> {
        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(current.map(Sequence::new).unwrap_or(Sequence::NONE))
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM events WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.aggregate_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_id = ${param_count}"));
        }
        if query.event_types.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ANY(${param_count})"));
        }
        if query.from_sequence.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND sequence >= ${param_count}"));
        }
        if query.to_sequence.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND sequence <= ${param_count}"));
        }

        sql.push_str(" ORDER BY global_position ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.aggregate_id {
            sqlx_query = sqlx_query.bind(id.into_inner());
        }
        if let Some(event_types) = query.event_types {
            sqlx_query = sqlx_query.bind(event_types);
        }
        if let Some(from) = query.from_sequence {
            sqlx_query = sqlx_query.bind(from.as_i64());
        }
        if let Some(to) = query.to_sequence {
            sqlx_query = sqlx_query.bind(to.as_i64());
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all(&self) -> Result<EventStream> {
        Ok(Self::paged(self.pool.clone(), Cursor::Global { after: 0 }))
    }
}
