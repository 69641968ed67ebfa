//! Asset register read model.
//!
//! One row per asset id, kept current with the asset's lifecycle: created,
//! recategorized, revalued, disposed. `current_value_minor` tracks the
//! latest revaluation and falls back to acquisition cost.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use aurum_assets::{AssetEvent, DisposalMethod};
use aurum_events::{EventEnvelope, EventHandler, HandlerError};

use super::cursor::{CursorCheck, VersionCursors};
use super::{sort_for_rebuild, ProjectionError, Rebuildable};
use crate::read_model::ReadStore;

/// Whether the asset is still on the register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssetStatus {
    Active,
    Disposed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Active => "ACTIVE",
            AssetStatus::Disposed => "DISPOSED",
        }
    }
}

/// Read model row: the register view of one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRegisterRow {
    pub asset_id: String,
    pub name: String,
    pub category_id: u32,
    pub cost_minor: u64,
    pub currency: String,
    /// Latest revalued amount; acquisition cost until the first revaluation.
    pub current_value_minor: u64,
    pub status: AssetStatus,
    pub purchase_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub disposal_date: Option<DateTime<Utc>>,
    pub disposal_proceeds_minor: Option<u64>,
    pub disposal_method: Option<DisposalMethod>,
    pub last_revalued: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl AssetRegisterRow {
    fn new(asset_id: String, as_of: DateTime<Utc>) -> Self {
        Self {
            asset_id,
            name: String::new(),
            category_id: 0,
            cost_minor: 0,
            currency: String::new(),
            current_value_minor: 0,
            status: AssetStatus::Active,
            purchase_date: None,
            location: None,
            disposal_date: None,
            disposal_proceeds_minor: None,
            disposal_method: None,
            last_revalued: None,
            last_updated: as_of,
        }
    }
}

/// Builds [`AssetRegisterRow`]s from asset events.
pub struct AssetRegisterProjection<S> {
    store: S,
    cursors: VersionCursors,
}

impl<S> AssetRegisterProjection<S>
where
    S: ReadStore<String, AssetRegisterRow>,
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
            .unwrap_or_else(|| AssetRegisterRow::new(key.clone(), envelope.occurred_at()));

        match event {
            AssetEvent::AssetCreated(e) => {
                row.name = e.name;
                row.category_id = e.category_id;
                row.cost_minor = e.cost_minor;
                row.currency = e.currency;
                row.current_value_minor = e.cost_minor;
                row.purchase_date = Some(e.purchase_date);
                row.location = e.location;
            }
            AssetEvent::AssetCategoryChanged(e) => {
                row.category_id = e.new_category_id;
            }
            AssetEvent::AssetDisposed(e) => {
                row.status = AssetStatus::Disposed;
                row.disposal_date = Some(e.disposal_date);
                row.disposal_proceeds_minor = Some(e.proceeds_minor);
                row.disposal_method = Some(e.method);
            }
            AssetEvent::AssetRevalued(e) => {
                row.current_value_minor = e.revalued_minor;
                row.last_revalued = Some(e.effective_date);
            }
        }

        row.last_updated = envelope.occurred_at();

        self.store.upsert(key, row);
        self.cursors
            .advance(envelope.aggregate_id(), envelope.version());
        Ok(())
    }

    pub fn find_asset(&self, asset_id: &str) -> Option<AssetRegisterRow> {
        self.store.get(&asset_id.to_string())
    }

    /// Assets in one category, ordered by asset id.
    pub fn find_by_category(&self, category_id: u32) -> Vec<AssetRegisterRow> {
        let mut rows: Vec<AssetRegisterRow> = self
            .store
            .list()
            .into_iter()
            .filter(|row| row.category_id == category_id)
            .collect();
        rows.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        rows
    }

    pub fn count_active(&self) -> u64 {
        self.store
            .list()
            .iter()
            .filter(|row| row.status == AssetStatus::Active)
            .count() as u64
    }

    pub fn count_by_status(&self) -> BTreeMap<AssetStatus, u64> {
        let mut counts = BTreeMap::new();
        for row in self.store.list() {
            *counts.entry(row.status).or_insert(0) += 1;
        }
        counts
    }

    /// Book value of the active register.
    pub fn total_current_value_minor(&self) -> u64 {
        self.store
            .list()
            .iter()
            .filter(|row| row.status == AssetStatus::Active)
            .map(|row| row.current_value_minor)
            .sum()
    }
}

impl<S> Rebuildable for AssetRegisterProjection<S>
where
    S: ReadStore<String, AssetRegisterRow>,
{
    fn projection_name(&self) -> &'static str {
        "asset_register"
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

impl<S> EventHandler for AssetRegisterProjection<S>
where
    S: ReadStore<String, AssetRegisterRow>,
{
    fn name(&self) -> &'static str {
        "asset_register"
    }

    fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        self.apply_envelope(event).map_err(HandlerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryReadStore;
    use aurum_assets::{AssetCategoryChanged, AssetCreated, AssetDisposed, AssetId, AssetRevalued};
    use aurum_core::{AggregateId, CorrelationId, EventId};
    use aurum_events::DomainEvent;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::sync::Arc;

    type TestStore = Arc<InMemoryReadStore<String, AssetRegisterRow>>;

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

    fn created(asset: &str, cost: u64, category: u32) -> AssetEvent {
        AssetEvent::AssetCreated(AssetCreated {
            asset_id: AssetId::new(asset),
            name: "Forklift".to_string(),
            category_id: category,
            cost_minor: cost,
            currency: "USD".to_string(),
            purchase_date: at(8),
            location: Some("Warehouse A".to_string()),
            occurred_at: at(9),
        })
    }

    fn projection() -> AssetRegisterProjection<TestStore> {
        AssetRegisterProjection::new(Arc::new(InMemoryReadStore::new()))
    }

    #[test]
    fn creation_registers_the_asset() {
        let projection = projection();
        projection
            .apply_envelope(&envelope(&created("AST-001", 10_000, 1), 1))
            .unwrap();

        let row = projection.find_asset("AST-001").unwrap();
        assert_eq!(row.cost_minor, 10_000);
        assert_eq!(row.current_value_minor, 10_000);
        assert_eq!(row.category_id, 1);
        assert_eq!(row.status, AssetStatus::Active);
    }

    #[test]
    fn lifecycle_updates_merge_into_the_row() {
        let projection = projection();
        projection
            .apply_envelope(&envelope(&created("AST-001", 10_000, 1), 1))
            .unwrap();

        let recategorized = AssetEvent::AssetCategoryChanged(AssetCategoryChanged {
            asset_id: AssetId::new("AST-001"),
            previous_category_id: 1,
            new_category_id: 3,
            reason: Some("reclassified".to_string()),
            occurred_at: at(10),
        });
        projection
            .apply_envelope(&envelope(&recategorized, 2))
            .unwrap();

        let revalued = AssetEvent::AssetRevalued(AssetRevalued {
            asset_id: AssetId::new("AST-001"),
            previous_value_minor: 10_000,
            revalued_minor: 8_500,
            effective_date: at(11),
            appraiser: None,
            occurred_at: at(11),
        });
        projection.apply_envelope(&envelope(&revalued, 3)).unwrap();

        let row = projection.find_asset("AST-001").unwrap();
        assert_eq!(row.category_id, 3);
        assert_eq!(row.current_value_minor, 8_500);
        // Acquisition cost is immutable.
        assert_eq!(row.cost_minor, 10_000);
        assert_eq!(row.last_revalued, Some(at(11)));
    }

    #[test]
    fn disposal_closes_the_row_and_leaves_the_register_counts() {
        let projection = projection();
        projection
            .apply_envelope(&envelope(&created("AST-001", 10_000, 1), 1))
            .unwrap();
        projection
            .apply_envelope(&envelope(&created("AST-002", 4_000, 1), 1))
            .unwrap();

        let disposed = AssetEvent::AssetDisposed(AssetDisposed {
            asset_id: AssetId::new("AST-001"),
            disposal_date: at(12),
            proceeds_minor: 2_500,
            method: DisposalMethod::Sold,
            occurred_at: at(12),
        });
        projection.apply_envelope(&envelope(&disposed, 2)).unwrap();

        let row = projection.find_asset("AST-001").unwrap();
        assert_eq!(row.status, AssetStatus::Disposed);
        assert_eq!(row.disposal_proceeds_minor, Some(2_500));
        assert_eq!(row.disposal_method, Some(DisposalMethod::Sold));

        assert_eq!(projection.count_active(), 1);
        assert_eq!(projection.total_current_value_minor(), 4_000);
        assert_eq!(
            projection.count_by_status().get(&AssetStatus::Disposed),
            Some(&1)
        );
    }

    #[test]
    fn category_listing_is_ordered() {
        let projection = projection();
        projection
            .apply_envelope(&envelope(&created("AST-002", 4_000, 1), 1))
            .unwrap();
        projection
            .apply_envelope(&envelope(&created("AST-001", 10_000, 1), 1))
            .unwrap();
        projection
            .apply_envelope(&envelope(&created("AST-003", 7_000, 2), 1))
            .unwrap();

        let in_category: Vec<String> = projection
            .find_by_category(1)
            .into_iter()
            .map(|row| row.asset_id)
            .collect();
        assert_eq!(in_category, vec!["AST-001", "AST-002"]);
    }

    #[test]
    fn non_asset_envelopes_are_ignored() {
        let projection = projection();
        let env = EventEnvelope::new(
            EventId::new(),
            AggregateId::from("TXN-1"),
            "finance.transaction".to_string(),
            "finance.settlement.created".to_string(),
            CorrelationId::new(),
            1,
            at(9),
            serde_json::json!({"kind": "settlement_created"}),
        );

        projection.apply_envelope(&env).unwrap();
        assert!(projection.find_asset("TXN-1").is_none());
    }

    #[test]
    fn rebuild_from_shuffled_log_restores_rows() {
        let projection = projection();

        let envs = vec![
            envelope(&created("AST-001", 10_000, 1), 1),
            envelope(
                &AssetEvent::AssetRevalued(AssetRevalued {
                    asset_id: AssetId::new("AST-001"),
                    previous_value_minor: 10_000,
                    revalued_minor: 9_000,
                    effective_date: at(11),
                    appraiser: None,
                    occurred_at: at(11),
                }),
                2,
            ),
        ];
        for env in &envs {
            projection.apply_envelope(env).unwrap();
        }
        let before = projection.find_asset("AST-001").unwrap();

        projection
            .rebuild_from_scratch(vec![envs[1].clone(), envs[0].clone()])
            .unwrap();
        let after = projection.find_asset("AST-001").unwrap();

        assert_eq!(before, after);
    }

    proptest! {
        /// Replaying an already-applied stream leaves the row unchanged.
        #[test]
        fn replay_is_idempotent(
            steps in proptest::collection::vec((0u8..3, 1_000u64..20_000), 0..8)
        ) {
            let projection = projection();

            let mut envs = vec![envelope(&created("AST-001", 10_000, 1), 1)];
            for (offset, (step, amount)) in steps.iter().copied().enumerate() {
                let event = match step {
                    0 => AssetEvent::AssetCategoryChanged(AssetCategoryChanged {
                        asset_id: AssetId::new("AST-001"),
                        previous_category_id: 1,
                        new_category_id: (amount % 7) as u32 + 1,
                        reason: None,
                        occurred_at: at(12),
                    }),
                    1 => AssetEvent::AssetRevalued(AssetRevalued {
                        asset_id: AssetId::new("AST-001"),
                        previous_value_minor: 10_000,
                        revalued_minor: amount,
                        effective_date: at(12),
                        appraiser: None,
                        occurred_at: at(12),
                    }),
                    _ => AssetEvent::AssetDisposed(AssetDisposed {
                        asset_id: AssetId::new("AST-001"),
                        disposal_date: at(12),
                        proceeds_minor: amount,
                        method: DisposalMethod::Sold,
                        occurred_at: at(12),
                    }),
                };
                envs.push(envelope(&event, offset as u64 + 2));
            }

            for env in &envs {
                projection.apply_envelope(env).unwrap();
            }
            let first_pass = projection.find_asset("AST-001");

            for env in &envs {
                projection.apply_envelope(env).unwrap();
            }
            prop_assert_eq!(projection.find_asset("AST-001"), first_pass);
        }
    }
}
