//! Read-side reconstruction over the event log.
//!
//! Everything here is a pure fold over store reads: the same log always
//! produces the same snapshot, trail, report or export (only the
//! `generated_at`/`exported_at` metadata stamps come from the clock).
//! Nothing is ever written back; an integrity violation is reported, never
//! auto-corrected.
//!
//! Each operation tallies its work into an [`OpContext`] and flushes the
//! totals to the metrics sink once, on completion, so concurrent operations
//! never share counters.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::instrument;

use aurum_core::{AggregateId, CorrelationId};

use crate::event_store::{EventRecord, EventStore, EventStoreError};
use crate::metrics::{metric, MetricsSink, NoopMetrics, OpContext};

const COMPLIANCE_EVENT_TYPE: &str = "audit.compliance.audited";

/// Point-in-time snapshot of one entity, folded from its events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_type: String,
    pub entity_id: String,
    /// The cut-off the snapshot was folded up to (`None` = full history).
    pub as_of: Option<DateTime<Utc>>,
    /// Field → latest value, later events overriding earlier ones.
    pub fields: BTreeMap<String, JsonValue>,
    /// Events considered by the fold.
    pub event_count: u64,
    pub event_history: Vec<EventRecord>,
}

/// Aggregated view of all activity in a period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceReport {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_events: u64,
    /// Events per event type.
    pub event_summary: BTreeMap<String, u64>,
    /// Events per aggregate type.
    pub entity_summary: BTreeMap<String, u64>,
    /// The compliance-kind events themselves, in occurred-at order.
    pub compliance_events: Vec<EventRecord>,
    pub generated_at: DateTime<Utc>,
}

/// Outcome of checking one stream's version sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub aggregate_id: String,
    /// True iff versions are exactly `1..=n`.
    pub valid: bool,
    /// Events checked.
    pub checked: u64,
    pub violations: Vec<String>,
}

/// Serialization target of an audit trail export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// What an export contains, alongside the body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportMetadata {
    pub entity_type: String,
    pub entity_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub format: ExportFormat,
    pub event_count: u64,
    pub exported_at: DateTime<Utc>,
}

/// Self-describing audit trail export bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditExport {
    pub metadata: ExportMetadata,
    pub body: String,
}

/// Rebuilds state, trails, reports and exports from stored events.
pub struct Reconstruction<S> {
    store: S,
    metrics: Arc<dyn MetricsSink>,
}

impl<S> Reconstruction<S>
where
    S: EventStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(store: S, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { store, metrics }
    }

    /// One aggregate's events at or after `since`, version-ascending.
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    pub fn replay_events(
        &self,
        aggregate_id: &AggregateId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let mut ctx = OpContext::new("replay_events");

        let stream = self.store.load_stream(aggregate_id)?;
        ctx.add(metric::EVENTS_SCANNED, stream.len() as u64);

        let replayed: Vec<EventRecord> = stream
            .into_iter()
            .filter(|record| since.map_or(true, |cutoff| record.occurred_at >= cutoff))
            .collect();
        ctx.add(metric::EVENTS_REPLAYED, replayed.len() as u64);

        ctx.flush(&*self.metrics);
        Ok(replayed)
    }

    /// Fold an entity's events up to `as_of` into a field snapshot.
    ///
    /// Every stream event inside the cut-off lands in the history; only
    /// those whose aggregate type matches `entity_type` contribute fields
    /// (audit events share the stream but describe, not define, the entity).
    #[instrument(skip(self), fields(entity_type, aggregate_id = %aggregate_id), err)]
    pub fn reconstruct_entity_state(
        &self,
        entity_type: &str,
        aggregate_id: &AggregateId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<EntityState, EventStoreError> {
        let mut ctx = OpContext::new("reconstruct_entity_state");

        let stream = self.store.load_stream(aggregate_id)?;
        ctx.add(metric::EVENTS_SCANNED, stream.len() as u64);

        let history: Vec<EventRecord> = stream
            .into_iter()
            .filter(|record| as_of.map_or(true, |cutoff| record.occurred_at <= cutoff))
            .collect();
        ctx.add(metric::EVENTS_REPLAYED, history.len() as u64);

        let mut fields = BTreeMap::new();
        for record in &history {
            if record.aggregate_type != entity_type {
                continue;
            }
            if let JsonValue::Object(payload) = &record.payload {
                for (key, value) in payload {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }

        ctx.flush(&*self.metrics);
        Ok(EntityState {
            entity_type: entity_type.to_string(),
            entity_id: aggregate_id.to_string(),
            as_of,
            fields,
            event_count: history.len() as u64,
            event_history: history,
        })
    }

    /// The entity's full trail (domain and audit events) inside `[from, to]`,
    /// version-ascending.
    #[instrument(skip(self), fields(entity_type, aggregate_id = %aggregate_id), err)]
    pub fn reconstruct_audit_trail(
        &self,
        entity_type: &str,
        aggregate_id: &AggregateId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let mut ctx = OpContext::new("reconstruct_audit_trail");
        let trail = self.trail_slice(aggregate_id, from, to, &mut ctx)?;
        ctx.flush(&*self.metrics);
        Ok(trail)
    }

    /// Aggregate all activity in `[from, to]` into a compliance view.
    #[instrument(skip(self), err)]
    pub fn generate_compliance_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ComplianceReport, EventStoreError> {
        let mut ctx = OpContext::new("compliance_report");

        let records = self.store.find_in_range(None, from, to)?;
        ctx.add(metric::EVENTS_SCANNED, records.len() as u64);

        let mut event_summary: BTreeMap<String, u64> = BTreeMap::new();
        let mut entity_summary: BTreeMap<String, u64> = BTreeMap::new();
        let mut compliance_events = Vec::new();

        for record in &records {
            *event_summary.entry(record.event_type.clone()).or_insert(0) += 1;
            *entity_summary
                .entry(record.aggregate_type.clone())
                .or_insert(0) += 1;
            if record.event_type == COMPLIANCE_EVENT_TYPE {
                compliance_events.push(record.clone());
            }
        }

        ctx.flush(&*self.metrics);
        Ok(ComplianceReport {
            period_start: from,
            period_end: to,
            total_events: records.len() as u64,
            event_summary,
            entity_summary,
            compliance_events,
            generated_at: Utc::now(),
        })
    }

    /// Every event sharing one correlation id, across aggregates.
    #[instrument(skip(self), fields(correlation_id = %correlation_id), err)]
    pub fn find_related_events(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let mut ctx = OpContext::new("find_related_events");
        let related = self.store.find_related(correlation_id)?;
        ctx.add(metric::EVENTS_SCANNED, related.len() as u64);
        ctx.flush(&*self.metrics);
        Ok(related)
    }

    /// True iff the stream's versions are exactly `1..=n`.
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    pub fn validate_event_integrity(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<bool, EventStoreError> {
        let mut ctx = OpContext::new("validate_event_integrity");

        let stream = self.store.load_stream(aggregate_id)?;
        ctx.add(metric::EVENTS_SCANNED, stream.len() as u64);

        let violations = check_version_sequence(&stream);
        ctx.add(metric::INTEGRITY_VIOLATIONS, violations.len() as u64);

        ctx.flush(&*self.metrics);
        Ok(violations.is_empty())
    }

    /// The report form of integrity validation, naming each violation.
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    pub fn integrity_report(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<IntegrityReport, EventStoreError> {
        let mut ctx = OpContext::new("integrity_report");

        let stream = self.store.load_stream(aggregate_id)?;
        ctx.add(metric::EVENTS_SCANNED, stream.len() as u64);

        let violations = check_version_sequence(&stream);
        ctx.add(metric::INTEGRITY_VIOLATIONS, violations.len() as u64);

        ctx.flush(&*self.metrics);
        Ok(IntegrityReport {
            aggregate_id: aggregate_id.to_string(),
            valid: violations.is_empty(),
            checked: stream.len() as u64,
            violations,
        })
    }

    /// Bundle an entity's trail as a self-describing export.
    #[instrument(
        skip(self),
        fields(entity_type, aggregate_id = %aggregate_id, format = format.as_str()),
        err
    )]
    pub fn export_audit_trail(
        &self,
        entity_type: &str,
        aggregate_id: &AggregateId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        format: ExportFormat,
    ) -> Result<AuditExport, EventStoreError> {
        let mut ctx = OpContext::new("export_audit_trail");

        let trail = self.trail_slice(aggregate_id, from, to, &mut ctx)?;
        let body = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&trail)
                .map_err(|e| EventStoreError::Serialization(e.to_string()))?,
            ExportFormat::Csv => render_csv(&trail)?,
        };

        ctx.flush(&*self.metrics);
        Ok(AuditExport {
            metadata: ExportMetadata {
                entity_type: entity_type.to_string(),
                entity_id: aggregate_id.to_string(),
                from,
                to,
                format,
                event_count: trail.len() as u64,
                exported_at: Utc::now(),
            },
            body,
        })
    }

    fn trail_slice(
        &self,
        aggregate_id: &AggregateId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        ctx: &mut OpContext,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let stream = self.store.load_stream(aggregate_id)?;
        ctx.add(metric::EVENTS_SCANNED, stream.len() as u64);

        Ok(stream
            .into_iter()
            .filter(|record| record.occurred_at >= from && record.occurred_at <= to)
            .collect())
    }
}

/// Violations of the `1..=n` version contract, one message each.
fn check_version_sequence(stream: &[EventRecord]) -> Vec<String> {
    let mut violations = Vec::new();

    for (index, record) in stream.iter().enumerate() {
        let expected = index as u64 + 1;
        if record.version != expected {
            violations.push(format!(
                "event {} has version {}, expected {}",
                record.event_id, record.version, expected
            ));
        }
    }

    violations
}

const CSV_HEADER: &str =
    "event_id,aggregate_id,aggregate_type,version,event_type,correlation_id,occurred_at,payload";

fn render_csv(records: &[EventRecord]) -> Result<String, EventStoreError> {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for record in records {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;
        let row = [
            record.event_id.to_string(),
            record.aggregate_id.to_string(),
            record.aggregate_type.clone(),
            record.version.to_string(),
            record.event_type.clone(),
            record.correlation_id.to_string(),
            record.occurred_at.to_rfc3339(),
            payload,
        ];
        let escaped: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }

    Ok(out)
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
