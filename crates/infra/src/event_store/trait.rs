use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use aurum_core::{AggregateId, CorrelationId, EventId, ExpectedVersion};
use aurum_events::{DomainEvent, EventEnvelope};

/// An event ready to be appended to a stream (not yet assigned a version).
///
/// ## Event lifecycle
///
/// 1. **Typed event**: constructed in a domain crate
/// 2. **PendingEvent**: payload serialized, envelope metadata captured
/// 3. **EventRecord**: persisted with its store-assigned version
/// 4. **EventEnvelope**: published to handlers and channels
///
/// Use [`PendingEvent::from_typed`] to build one; it serializes the payload
/// and captures type/time metadata from the [`DomainEvent`] impl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub schema_version: u32,
    pub correlation_id: CorrelationId,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl PendingEvent {
    /// Build a pending event from a typed domain event.
    ///
    /// A fresh `event_id` is generated; tests that need fixed ids construct
    /// the struct directly.
    pub fn from_typed<E>(
        aggregate_id: impl Into<AggregateId>,
        correlation_id: CorrelationId,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: DomainEvent + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

        Ok(Self {
            event_id: EventId::new(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: event.aggregate_type().to_string(),
            event_type: event.event_type().to_string(),
            schema_version: event.schema_version(),
            correlation_id,
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// A persisted event.
///
/// The version is assigned by the store at append time: monotonically
/// increasing per aggregate, starting at 1, no gaps. Everything except
/// `processed` and `retry_count` is immutable once stored; those two are
/// consumer bookkeeping and the only permitted after-the-fact updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub version: u64,

    pub event_type: String,
    pub schema_version: u32,
    pub correlation_id: CorrelationId,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,

    /// Set by a channel consumer once the event's downstream effects are
    /// persisted.
    pub processed: bool,
    /// Number of failed consumption attempts so far.
    pub retry_count: u32,
}

impl EventRecord {
    /// Strip store bookkeeping into the published unit.
    pub fn to_envelope(&self) -> EventEnvelope {
        EventEnvelope::new(
            self.event_id,
            self.aggregate_id.clone(),
            self.aggregate_type.clone(),
            self.event_type.clone(),
            self.correlation_id,
            self.version,
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Event store operation error.
///
/// Infrastructure failures only; payload-level validation lives with the
/// validator seam. A `Storage` error is fatal to the operation that raised
/// it: the event is not stored and nothing is dispatched.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("event not found: {0}")]
    NotFound(EventId),
}

/// Append-only store of domain events.
///
/// One stream per aggregate id. Append assigns versions starting at
/// `current + 1` (a new stream starts at 1), checks the caller's
/// [`ExpectedVersion`] against the current stream head, and persists the
/// batch atomically. There is no update and no delete; `mark_processed`
/// and `increment_retry` touch only the two bookkeeping fields.
///
/// Reads are the canonical inputs of reconstruction: `load_stream` returns
/// version-ascending history, `find_in_range`/`find_related` return
/// occurred-at-ordered slices across streams.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        events: Vec<PendingEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<EventRecord>, EventStoreError>;

    /// A single event by id.
    fn find_by_event_id(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError>;

    /// Full history of one aggregate, version-ascending.
    fn load_stream(&self, aggregate_id: &AggregateId) -> Result<Vec<EventRecord>, EventStoreError>;

    /// All events sharing a correlation id, across aggregates, ordered by
    /// occurred_at then version.
    fn find_related(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<EventRecord>, EventStoreError>;

    /// Total number of stored events.
    fn count(&self) -> Result<u64, EventStoreError>;

    /// Events with `from <= occurred_at <= to`, optionally restricted to one
    /// aggregate type, ordered by occurred_at then version.
    fn find_in_range(
        &self,
        aggregate_type: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, EventStoreError>;

    /// Flag an event as processed (consumer bookkeeping).
    fn mark_processed(&self, event_id: EventId) -> Result<(), EventStoreError>;

    /// Record one more failed consumption attempt; returns the new count.
    fn increment_retry(&self, event_id: EventId) -> Result<u32, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<PendingEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn find_by_event_id(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError> {
        (**self).find_by_event_id(event_id)
    }

    fn load_stream(&self, aggregate_id: &AggregateId) -> Result<Vec<EventRecord>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }

    fn find_related(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        (**self).find_related(correlation_id)
    }

    fn count(&self) -> Result<u64, EventStoreError> {
        (**self).count()
    }

    fn find_in_range(
        &self,
        aggregate_type: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        (**self).find_in_range(aggregate_type, from, to)
    }

    fn mark_processed(&self, event_id: EventId) -> Result<(), EventStoreError> {
        (**self).mark_processed(event_id)
    }

    fn increment_retry(&self, event_id: EventId) -> Result<u32, EventStoreError> {
        (**self).increment_retry(event_id)
    }
}
