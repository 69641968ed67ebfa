//! Postgres-backed event store.
//!
//! Events live in a single `domain_events` table with a unique constraint on
//! `(aggregate_id, version)`; that constraint is what makes optimistic
//! concurrency hold even when two writers pass the in-transaction version
//! check at the same time.
//!
//! ## Error mapping
//!
//! | Postgres error code | `EventStoreError` | Scenario |
//! |---------------------|-------------------|----------|
//! | `23505` (unique violation) | `VersionConflict` | concurrent append to one stream |
//! | `23503`, `23514` | `InvalidAppend` | referential or check constraint broken |
//! | other database errors | `Storage` | connection, syntax, permissions |
//!
//! Everything else sqlx can raise (pool closed, I/O, decode) maps to
//! `Storage`.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;

use aurum_core::{AggregateId, CorrelationId, EventId, ExpectedVersion};

use super::query::{EventFilter, EventPage, EventQuery, Pagination};
use super::r#trait::{EventRecord, EventStore, EventStoreError, PendingEvent};

/// Append-only event store on PostgreSQL.
///
/// The sync [`EventStore`] impl bridges to the async inherent methods via the
/// ambient tokio runtime, so it must be called from within one. Services that
/// are already async should prefer the inherent methods directly.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `domain_events` table and its indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domain_events (
                event_id       UUID PRIMARY KEY,
                aggregate_id   TEXT NOT NULL,
                aggregate_type TEXT NOT NULL,
                version        BIGINT NOT NULL CHECK (version >= 1),
                event_type     TEXT NOT NULL,
                schema_version INTEGER NOT NULL DEFAULT 1,
                correlation_id UUID NOT NULL,
                occurred_at    TIMESTAMPTZ NOT NULL,
                payload        JSONB NOT NULL,
                processed      BOOLEAN NOT NULL DEFAULT FALSE,
                retry_count    INTEGER NOT NULL DEFAULT 0,
                recorded_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (aggregate_id, version)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS domain_events_correlation_idx \
             ON domain_events (correlation_id)",
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_index", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS domain_events_type_time_idx \
             ON domain_events (aggregate_type, occurred_at)",
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_index", e))?;

        Ok(())
    }

    /// Append a batch to one stream with optimistic concurrency control.
    ///
    /// Version check and inserts run in a single transaction; a concurrent
    /// append that wins the race trips the unique constraint and surfaces as
    /// [`EventStoreError::VersionConflict`].
    #[instrument(
        skip(self, events),
        fields(event_count = events.len(), expected = ?expected_version),
        err
    )]
    pub async fn append_events(
        &self,
        events: Vec<PendingEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::InvalidAppend(
                "append requires at least one event".into(),
            ));
        }

        let aggregate_id = events[0].aggregate_id.clone();
        let aggregate_type = events[0].aggregate_type.clone();
        if aggregate_id.is_empty() {
            return Err(EventStoreError::InvalidAppend(
                "aggregate id must not be empty".into(),
            ));
        }
        for event in &events[1..] {
            if event.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch spans aggregates {aggregate_id} and {}",
                    event.aggregate_id
                )));
            }
            if event.aggregate_type != aggregate_type {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch spans aggregate types {aggregate_type} and {}",
                    event.aggregate_type
                )));
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = current_stream_version(&mut tx, &aggregate_id).await?;
        if !expected_version.matches(current) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::VersionConflict(format!(
                "aggregate {aggregate_id} is at version {current}, expected {expected_version:?}"
            )));
        }

        let mut appended = Vec::with_capacity(events.len());
        let mut next_version = current + 1;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO domain_events (
                    event_id,
                    aggregate_id,
                    aggregate_type,
                    version,
                    event_type,
                    schema_version,
                    correlation_id,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(event.aggregate_id.as_str())
            .bind(&event.aggregate_type)
            .bind(next_version as i64)
            .bind(&event.event_type)
            .bind(event.schema_version as i32)
            .bind(event.correlation_id.as_uuid())
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::VersionConflict(format!(
                        "concurrent append detected: version {next_version} already exists"
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            appended.push(EventRecord {
                event_id: event.event_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                version: next_version,
                event_type: event.event_type,
                schema_version: event.schema_version,
                correlation_id: event.correlation_id,
                occurred_at: event.occurred_at,
                payload: event.payload,
                processed: false,
                retry_count: 0,
            });
            next_version += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(appended)
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub async fn fetch_by_event_id(
        &self,
        event_id: EventId,
    ) -> Result<Option<EventRecord>, EventStoreError> {
        let row = sqlx::query(&select_events("WHERE event_id = $1", "LIMIT 1"))
            .bind(event_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_by_event_id", e))?;

        row.map(|row| decode_record(&row)).transpose()
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    pub async fn fetch_stream(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let rows = sqlx::query(&select_events(
            "WHERE aggregate_id = $1",
            "ORDER BY version ASC",
        ))
        .bind(aggregate_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_stream", e))?;

        rows.iter().map(decode_record).collect()
    }

    #[instrument(skip(self), fields(correlation_id = %correlation_id), err)]
    pub async fn fetch_related(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let rows = sqlx::query(&select_events(
            "WHERE correlation_id = $1",
            "ORDER BY occurred_at ASC, version ASC",
        ))
        .bind(correlation_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_related", e))?;

        rows.iter().map(decode_record).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn count_events(&self) -> Result<u64, EventStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM domain_events")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_events", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| EventStoreError::Storage(format!("failed to read count: {e}")))?;
        Ok(total as u64)
    }

    #[instrument(skip(self), fields(aggregate_type = ?aggregate_type), err)]
    pub async fn fetch_in_range(
        &self,
        aggregate_type: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let rows = sqlx::query(&select_events(
            "WHERE occurred_at >= $1 AND occurred_at <= $2 \
             AND ($3::text IS NULL OR aggregate_type = $3)",
            "ORDER BY occurred_at ASC, version ASC",
        ))
        .bind(from)
        .bind(to)
        .bind(aggregate_type)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_in_range", e))?;

        rows.iter().map(decode_record).collect()
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub async fn set_processed(&self, event_id: EventId) -> Result<(), EventStoreError> {
        let result = sqlx::query("UPDATE domain_events SET processed = TRUE WHERE event_id = $1")
            .bind(event_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_processed", e))?;

        if result.rows_affected() == 0 {
            return Err(EventStoreError::NotFound(event_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub async fn bump_retry(&self, event_id: EventId) -> Result<u32, EventStoreError> {
        let row = sqlx::query(
            "UPDATE domain_events SET retry_count = retry_count + 1 \
             WHERE event_id = $1 RETURNING retry_count",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("bump_retry", e))?
        .ok_or(EventStoreError::NotFound(event_id))?;

        let retry_count: i32 = row
            .try_get("retry_count")
            .map_err(|e| EventStoreError::Storage(format!("failed to read retry_count: {e}")))?;
        Ok(retry_count as u32)
    }
}

// Optional filters as `($n IS NULL OR col = $n)` so one parameterized query
// covers every combination.
const QUERY_FILTER_CLAUSE: &str = "($1::text IS NULL OR aggregate_type = $1) \
     AND ($2::text IS NULL OR event_type = $2) \
     AND ($3::uuid IS NULL OR correlation_id = $3) \
     AND ($4::timestamptz IS NULL OR occurred_at >= $4) \
     AND ($5::timestamptz IS NULL OR occurred_at <= $5)";

#[async_trait::async_trait]
impl EventQuery for PostgresEventStore {
    async fn query_events(
        &self,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventPage, EventStoreError> {
        let aggregate_type = filter.aggregate_type.as_deref();
        let event_type = filter.event_type.as_deref();
        let correlation_id: Option<uuid::Uuid> = filter.correlation_id.map(|c| *c.as_uuid());

        let count_row = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM domain_events WHERE {QUERY_FILTER_CLAUSE}"
        ))
        .bind(aggregate_type)
        .bind(event_type)
        .bind(correlation_id)
        .bind(filter.occurred_from)
        .bind(filter.occurred_to)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_events_count", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| EventStoreError::Storage(format!("failed to read count: {e}")))?;

        let rows = sqlx::query(&select_events(
            &format!("WHERE {QUERY_FILTER_CLAUSE}"),
            "ORDER BY occurred_at ASC, version ASC LIMIT $6 OFFSET $7",
        ))
        .bind(aggregate_type)
        .bind(event_type)
        .bind(correlation_id)
        .bind(filter.occurred_from)
        .bind(filter.occurred_to)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_events", e))?;

        let events: Vec<EventRecord> = rows
            .iter()
            .map(decode_record)
            .collect::<Result<_, _>>()?;
        let has_more = pagination.offset() + (events.len() as u64) < total as u64;

        Ok(EventPage {
            events,
            total: total as u64,
            pagination,
            has_more,
        })
    }
}

/// Current head version of a stream, 0 when the stream does not exist.
async fn current_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: &AggregateId,
) -> Result<u64, EventStoreError> {
    let row = sqlx::query(
        "SELECT COALESCE(MAX(version), 0) AS current_version \
         FROM domain_events WHERE aggregate_id = $1",
    )
    .bind(aggregate_id.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("current_stream_version", e))?;

    let current: i64 = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Storage(format!("failed to read current_version: {e}")))?;
    Ok(current as u64)
}

fn select_events(where_clause: &str, tail: &str) -> String {
    format!(
        "SELECT event_id, aggregate_id, aggregate_type, version, event_type, \
         schema_version, correlation_id, occurred_at, payload, processed, retry_count \
         FROM domain_events {where_clause} {tail}"
    )
}

fn decode_record(row: &sqlx::postgres::PgRow) -> Result<EventRecord, EventStoreError> {
    let decode = |e: sqlx::Error| EventStoreError::Storage(format!("failed to decode row: {e}"));

    let event_id: uuid::Uuid = row.try_get("event_id").map_err(decode)?;
    let aggregate_id: String = row.try_get("aggregate_id").map_err(decode)?;
    let version: i64 = row.try_get("version").map_err(decode)?;
    let schema_version: i32 = row.try_get("schema_version").map_err(decode)?;
    let correlation_id: uuid::Uuid = row.try_get("correlation_id").map_err(decode)?;
    let retry_count: i32 = row.try_get("retry_count").map_err(decode)?;

    Ok(EventRecord {
        event_id: EventId::from_uuid(event_id),
        aggregate_id: AggregateId::from(aggregate_id),
        aggregate_type: row.try_get("aggregate_type").map_err(decode)?,
        version: version as u64,
        event_type: row.try_get("event_type").map_err(decode)?,
        schema_version: schema_version as u32,
        correlation_id: CorrelationId::from_uuid(correlation_id),
        occurred_at: row.try_get("occurred_at").map_err(decode)?,
        payload: row.try_get("payload").map_err(decode)?,
        processed: row.try_get("processed").map_err(decode)?,
        retry_count: retry_count as u32,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::VersionConflict(msg),
                Some("23503") | Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => EventStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

fn runtime_handle() -> Result<tokio::runtime::Handle, EventStoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        EventStoreError::Storage(
            "PostgresEventStore requires an ambient tokio runtime".to_string(),
        )
    })
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<PendingEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        runtime_handle()?.block_on(self.append_events(events, expected_version))
    }

    fn find_by_event_id(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError> {
        runtime_handle()?.block_on(self.fetch_by_event_id(event_id))
    }

    fn load_stream(&self, aggregate_id: &AggregateId) -> Result<Vec<EventRecord>, EventStoreError> {
        runtime_handle()?.block_on(self.fetch_stream(aggregate_id))
    }

    fn find_related(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        runtime_handle()?.block_on(self.fetch_related(correlation_id))
    }

    fn count(&self) -> Result<u64, EventStoreError> {
        runtime_handle()?.block_on(self.count_events())
    }

    fn find_in_range(
        &self,
        aggregate_type: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        runtime_handle()?.block_on(self.fetch_in_range(aggregate_type, from, to))
    }

    fn mark_processed(&self, event_id: EventId) -> Result<(), EventStoreError> {
        runtime_handle()?.block_on(self.set_processed(event_id))
    }

    fn increment_retry(&self, event_id: EventId) -> Result<u32, EventStoreError> {
        runtime_handle()?.block_on(self.bump_retry(event_id))
    }
}
