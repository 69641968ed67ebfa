//! Filtering and pagination over stored events.
//!
//! Audit browsing and export work over potentially large histories, so every
//! listing path takes a [`Pagination`] and most take an [`EventFilter`].
//! Filters compose with AND semantics; an empty filter matches everything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aurum_core::CorrelationId;

use super::r#trait::{EventRecord, EventStoreError};

const DEFAULT_LIMIT: u64 = 50;
const MAX_LIMIT: u64 = 1000;

/// Offset/limit pagination window.
///
/// Limits are clamped to `1..=1000`; the default page is 50 wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    limit: u64,
    offset: u64,
}

impl Pagination {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self {
            limit: limit.clamp(1, MAX_LIMIT),
            offset,
        }
    }

    /// First page at the default width.
    pub fn first_page() -> Self {
        Self::default()
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The window immediately after this one.
    pub fn next_page(&self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset + self.limit,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Criteria for selecting events; all set fields must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub aggregate_type: Option<String>,
    pub event_type: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub occurred_from: Option<DateTime<Utc>>,
    pub occurred_to: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Inclusive occurred-at window.
    pub fn with_occurred_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.occurred_from = Some(from);
        self.occurred_to = Some(to);
        self
    }

    pub fn matches(&self, record: &EventRecord) -> bool {
        self.aggregate_type
            .as_deref()
            .map_or(true, |t| record.aggregate_type == t)
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| record.event_type == t)
            && self
                .correlation_id
                .map_or(true, |c| record.correlation_id == c)
            && self.occurred_from.map_or(true, |from| record.occurred_at >= from)
            && self.occurred_to.map_or(true, |to| record.occurred_at <= to)
    }
}

/// One page of matching events plus enough context to fetch the next.
#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<EventRecord>,
    /// Matching events across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Async paged scan over the full event log.
///
/// Pool-backed stores push the filter into SQL instead of materialising the
/// log; ordering is occurred-at then version, so pages stay stable while
/// writers keep appending.
#[async_trait::async_trait]
pub trait EventQuery: Send + Sync {
    async fn query_events(
        &self,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventPage, EventStoreError>;
}

/// Apply `filter` then `pagination` to an already-ordered record list.
pub fn paginate_filtered(
    records: &[EventRecord],
    filter: &EventFilter,
    pagination: Pagination,
) -> EventPage {
    let matching: Vec<&EventRecord> = records.iter().filter(|r| filter.matches(r)).collect();
    let total = matching.len() as u64;

    let events: Vec<EventRecord> = matching
        .into_iter()
        .skip(pagination.offset() as usize)
        .take(pagination.limit() as usize)
        .cloned()
        .collect();

    let has_more = pagination.offset() + (events.len() as u64) < total;

    EventPage {
        events,
        total,
        pagination,
        has_more,
    }
}
