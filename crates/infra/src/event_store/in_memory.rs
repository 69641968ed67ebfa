use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use aurum_core::{AggregateId, CorrelationId, EventId, ExpectedVersion};

use super::r#trait::{EventRecord, EventStore, EventStoreError, PendingEvent};

/// In-memory event store backed by a `HashMap` of streams.
///
/// Used by unit and integration tests and as the reference semantics the
/// Postgres store must match. Version assignment, expected-version checks
/// and cross-stream ordering behave exactly as documented on [`EventStore`].
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<Streams>,
}

type Streams = HashMap<AggregateId, Vec<EventRecord>>;

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_streams(&self) -> Result<RwLockReadGuard<'_, Streams>, EventStoreError> {
        self.streams
            .read()
            .map_err(|_| EventStoreError::Storage("stream lock poisoned".to_string()))
    }

    fn write_streams(&self) -> Result<RwLockWriteGuard<'_, Streams>, EventStoreError> {
        self.streams
            .write()
            .map_err(|_| EventStoreError::Storage("stream lock poisoned".to_string()))
    }

    fn sort_cross_stream(mut records: Vec<EventRecord>) -> Vec<EventRecord> {
        records.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then(a.version.cmp(&b.version))
        });
        records
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
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

        let mut streams = self.write_streams()?;

        let current = streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map(|record| record.version)
            .unwrap_or(0);
        if !expected_version.matches(current) {
            return Err(EventStoreError::VersionConflict(format!(
                "aggregate {aggregate_id} is at version {current}, expected {expected_version:?}"
            )));
        }

        let stream = streams.entry(aggregate_id).or_default();

        let mut appended = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            let record = EventRecord {
                event_id: event.event_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                version: current + 1 + offset as u64,
                event_type: event.event_type,
                schema_version: event.schema_version,
                correlation_id: event.correlation_id,
                occurred_at: event.occurred_at,
                payload: event.payload,
                processed: false,
                retry_count: 0,
            };
            stream.push(record.clone());
            appended.push(record);
        }

        Ok(appended)
    }

    fn find_by_event_id(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError> {
        let streams = self.read_streams()?;
        Ok(streams
            .values()
            .flatten()
            .find(|record| record.event_id == event_id)
            .cloned())
    }

    fn load_stream(&self, aggregate_id: &AggregateId) -> Result<Vec<EventRecord>, EventStoreError> {
        let streams = self.read_streams()?;
        Ok(streams.get(aggregate_id).cloned().unwrap_or_default())
    }

    fn find_related(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let streams = self.read_streams()?;
        let related = streams
            .values()
            .flatten()
            .filter(|record| record.correlation_id == correlation_id)
            .cloned()
            .collect();
        Ok(Self::sort_cross_stream(related))
    }

    fn count(&self) -> Result<u64, EventStoreError> {
        let streams = self.read_streams()?;
        Ok(streams.values().map(|stream| stream.len() as u64).sum())
    }

    fn find_in_range(
        &self,
        aggregate_type: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let streams = self.read_streams()?;
        let matching = streams
            .values()
            .flatten()
            .filter(|record| record.occurred_at >= from && record.occurred_at <= to)
            .filter(|record| aggregate_type.map_or(true, |t| record.aggregate_type == t))
            .cloned()
            .collect();
        Ok(Self::sort_cross_stream(matching))
    }

    fn mark_processed(&self, event_id: EventId) -> Result<(), EventStoreError> {
        let mut streams = self.write_streams()?;
        let record = streams
            .values_mut()
            .flatten()
            .find(|record| record.event_id == event_id)
            .ok_or(EventStoreError::NotFound(event_id))?;
        record.processed = true;
        Ok(())
    }

    fn increment_retry(&self, event_id: EventId) -> Result<u32, EventStoreError> {
        let mut streams = self.write_streams()?;
        let record = streams
            .values_mut()
            .flatten()
            .find(|record| record.event_id == event_id)
            .ok_or(EventStoreError::NotFound(event_id))?;
        record.retry_count += 1;
        Ok(record.retry_count)
    }
}
