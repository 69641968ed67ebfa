use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use aurum_core::{AggregateId, CorrelationId, EventId};

/// The published unit: one stored event, stripped of store bookkeeping.
///
/// An envelope is what handlers, channel consumers and reconstruction see.
/// Fields are private and read-only; once an event left the store nothing
/// downstream may rewrite it.
///
/// Notes:
/// - `version` is the per-aggregate position assigned by the store
///   (monotonic, starts at 1, no gaps).
/// - `payload` is the kind-specific body as a JSON object, so consumers that
///   only care about metadata never need the typed event, and state folding
///   can merge fields without knowing every payload type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: EventId,
    aggregate_id: AggregateId,
    aggregate_type: String,
    event_type: String,
    correlation_id: CorrelationId,

    /// Monotonically increasing position in the aggregate stream.
    version: u64,

    occurred_at: DateTime<Utc>,
    payload: JsonValue,
}

impl EventEnvelope {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: EventId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        correlation_id: CorrelationId,
        version: u64,
        occurred_at: DateTime<Utc>,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            correlation_id,
            version,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }

    /// Decode the payload back into its typed event.
    pub fn decode<E: serde::de::DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
