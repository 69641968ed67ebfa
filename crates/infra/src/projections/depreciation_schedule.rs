//! Depreciation schedule read model.
//!
//! Tracks the depreciable basis per asset. Creation opens a schedule at
//! acquisition cost, revaluations reset the basis, disposal closes the
//! schedule. Category moves are tracked because depreciation policy is
//! keyed by category.

use chrono::{DateTime, Utc};

use aurum_assets::AssetEvent;
use aurum_events::{EventEnvelope, EventHandler, HandlerError};

use super::cursor::{CursorCheck, VersionCursors};
use super::{sort_for_rebuild, ProjectionError, Rebuildable};
use crate::read_model::ReadStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStatus {
    Depreciating,
    Closed,
}

/// Read model row: the depreciation view of one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepreciationScheduleRow {
    pub asset_id: String,
    pub category_id: u32,
    /// Amount still subject to depreciation, in smallest currency unit.
    pub basis_minor: u64,
    pub in_service_date: Option<DateTime<Utc>>,
    pub status: ScheduleStatus,
    pub last_event_at: DateTime<Utc>,
}

impl DepreciationScheduleRow {
    fn new(asset_id: String, as_of: DateTime<Utc>) -> Self {
        Self {
            asset_id,
            category_id: 0,
            basis_minor: 0,
            in_service_date: None,
            status: ScheduleStatus::Depreciating,
            last_event_at: as_of,
        }
    }
}

/// Builds [`DepreciationScheduleRow`]s from asset events.
pub struct DepreciationScheduleProjection<S> {
    store: S,
    cursors: VersionCursors,
}

impl<S> DepreciationScheduleProjection<S>
where
    S: ReadStore<String, DepreciationScheduleRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: VersionCursors::new(),
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != "assets.asset" {
            return Ok(());
        }

        match self.cursors.check(envelope.aggregate_id(), envelope.version())? {
            CursorCheck::AlreadyApplied => return Ok(()),
            CursorCheck::Apply => {}
        }

        let event: AssetEvent = envelope
            .decode()
            .map_err(|source| ProjectionError::Decode {
                event_type: envelope.event_type().to_string(),
                source,
            })?;

        if event.asset_id().as_str() != envelope.aggregate_id().as_str() {
            return Err(ProjectionError::IdMismatch {
                envelope: envelope.aggregate_id().to_string(),
                payload: event.asset_id().to_string(),
            });
        }

        let key = event.asset_id().as_str().to_string();
        let mut row = self
            .store
            .get(&key)
            .unwrap_or_else(|| DepreciationScheduleRow::new(key.clone(), envelope.occurred_at()));

        match event {
            AssetEvent::AssetCreated(e) => {
                row.category_id = e.category_id;
                row.basis_minor = e.cost_minor;
                row.in_service_date = Some(e.purchase_date);
            }
            AssetEvent::AssetCategoryChanged(e) => {
                row.category_id = e.new_category_id;
            }
            AssetEvent::AssetRevalued(e) => {
                row.basis_minor = e.revalued_minor;
            }
            AssetEvent::AssetDisposed(_) => {
                row.status = ScheduleStatus::Closed;
            }
        }

        row.last_event_at = envelope.occurred_at();

        self.store.upsert(key, row);
        self.cursors
            .advance(envelope.aggregate_id(), envelope.version());
        Ok(())
    }

    pub fn find_schedule(&self, asset_id: &str) -> Option<DepreciationScheduleRow> {
        self.store.get(&asset_id.to_string())
    }

    /// Schedules still accruing depreciation, ordered by asset id.
    pub fn open_schedules(&self) -> Vec<DepreciationScheduleRow> {
        let mut rows: Vec<DepreciationScheduleRow> = self
            .store
            .list()
            .into_iter()
            .filter(|row| row.status == ScheduleStatus::Depreciating)
            .collect();
        rows.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        rows
    }

    pub fn total_open_basis_minor(&self) -> u64 {
        self.store
            .list()
            .iter()
            .filter(|row| row.status == ScheduleStatus::Depreciating)
            .map(|row| row.basis_minor)
            .sum()
    }
}

impl<S> Rebuildable for DepreciationScheduleProjection<S>
where
    S: ReadStore<String, DepreciationScheduleRow>,
{
    fn projection_name(&self) -> &'static str {
        "depreciation_schedule"
    }

    fn rebuild_from_scratch(&self, mut envelopes: Vec<EventEnvelope>) -> Result<(), ProjectionError> {
        self.store.clear();
        self.cursors.clear();
        sort_for_rebuild(&mut envelopes);
        for envelope in &envelopes {
            self.apply_envelope(envelope)?;
        }
        Ok(())
    }
}

impl<S> EventHandler for DepreciationScheduleProjection<S>
where
    S: ReadStore<String, DepreciationScheduleRow>,
{
    fn name(&self) -> &'static str {
        "depreciation_schedule"
    }

    fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        self.apply_envelope(event).map_err(HandlerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryReadStore;
    use aurum_assets::{AssetCreated, AssetDisposed, AssetId, AssetRevalued, DisposalMethod};
    use aurum_core::{AggregateId, CorrelationId, EventId};
    use aurum_events::DomainEvent;
    use chrono::TimeZone;
    use std::sync::Arc;

    type TestStore = Arc<InMemoryReadStore<String, DepreciationScheduleRow>>;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap()
    }

    fn envelope(event: &AssetEvent, version: u64) -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            AggregateId::from(event.asset_id().as_str()),
            event.aggregate_type().to_string(),
            event.event_type().to_string(),
            CorrelationId::new(),
            version,
            event.occurred_at(),
            serde_json::to_value(event).unwrap(),
        )
    }

    fn created(asset: &str, cost: u64) -> AssetEvent {
        AssetEvent::AssetCreated(AssetCreated {
            asset_id: AssetId::new(asset),
            name: "Press".to_string(),
            category_id: 2,
            cost_minor: cost,
            currency: "USD".to_string(),
            purchase_date: at(8),
            location: None,
            occurred_at: at(9),
        })
    }

    fn projection() -> DepreciationScheduleProjection<TestStore> {
        DepreciationScheduleProjection::new(Arc::new(InMemoryReadStore::new()))
    }

    #[test]
    fn creation_opens_a_schedule_at_cost() {
        let projection = projection();
        projection
            .apply_envelope(&envelope(&created("AST-010", 60_000), 1))
            .unwrap();

        let row = projection.find_schedule("AST-010").unwrap();
        assert_eq!(row.basis_minor, 60_000);
        assert_eq!(row.category_id, 2);
        assert_eq!(row.in_service_date, Some(at(8)));
        assert_eq!(row.status, ScheduleStatus::Depreciating);
    }

    #[test]
    fn revaluation_resets_the_basis() {
        let projection = projection();
        projection
            .apply_envelope(&envelope(&created("AST-010", 60_000), 1))
            .unwrap();

        let revalued = AssetEvent::AssetRevalued(AssetRevalued {
            asset_id: AssetId::new("AST-010"),
            previous_value_minor: 60_000,
            revalued_minor: 45_000,
            effective_date: at(11),
            appraiser: Some("Lane & Co".to_string()),
            occurred_at: at(11),
        });
        projection.apply_envelope(&envelope(&revalued, 2)).unwrap();

        let row = projection.find_schedule("AST-010").unwrap();
        assert_eq!(row.basis_minor, 45_000);
        assert_eq!(row.last_event_at, at(11));
    }

    #[test]
    fn disposal_closes_the_schedule() {
        let projection = projection();
        projection
            .apply_envelope(&envelope(&created("AST-010", 60_000), 1))
            .unwrap();
        projection
            .apply_envelope(&envelope(&created("AST-011", 5_000), 1))
            .unwrap();

        let disposed = AssetEvent::AssetDisposed(AssetDisposed {
            asset_id: AssetId::new("AST-010"),
            disposal_date: at(12),
            proceeds_minor: 0,
            method: DisposalMethod::Scrapped,
            occurred_at: at(12),
        });
        projection.apply_envelope(&envelope(&disposed, 2)).unwrap();

        assert_eq!(
            projection.find_schedule("AST-010").unwrap().status,
            ScheduleStatus::Closed
        );
        let open: Vec<String> = projection
            .open_schedules()
            .into_iter()
            .map(|row| row.asset_id)
            .collect();
        assert_eq!(open, vec!["AST-011"]);
        assert_eq!(projection.total_open_basis_minor(), 5_000);
    }

    #[test]
    fn replayed_version_is_skipped() {
        let projection = projection();
        let create = envelope(&created("AST-010", 60_000), 1);
        projection.apply_envelope(&create).unwrap();

        let revalued = AssetEvent::AssetRevalued(AssetRevalued {
            asset_id: AssetId::new("AST-010"),
            previous_value_minor: 60_000,
            revalued_minor: 45_000,
            effective_date: at(11),
            appraiser: None,
            occurred_at: at(11),
        });
        projection.apply_envelope(&envelope(&revalued, 2)).unwrap();

        // Replaying version 1 must not clobber the revalued basis.
        projection.apply_envelope(&create).unwrap();
        assert_eq!(projection.find_schedule("AST-010").unwrap().basis_minor, 45_000);
    }
}
