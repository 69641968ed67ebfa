//! Projection implementations (read model builders).
//!
//! Projections consume committed envelopes and maintain query-optimized
//! rows keyed by natural business identifiers. All projections are:
//! - **Idempotent**: redelivered envelopes are skipped via version cursors
//! - **Order-enforcing**: a version gap is an error, never silent corruption
//! - **Rebuildable**: rows can be reconstructed from the full event log

pub mod asset_register;
pub mod cursor;
pub mod depreciation_schedule;
pub mod financial_reports;

use thiserror::Error;

use aurum_events::{EventEnvelope, HandlerError};

pub use asset_register::{AssetRegisterProjection, AssetRegisterRow, AssetStatus};
pub use cursor::{CursorCheck, OutOfOrder, VersionCursors};
pub use depreciation_schedule::{
    DepreciationScheduleProjection, DepreciationScheduleRow, ScheduleStatus,
};
pub use financial_reports::{
    FinancialReportProjection, FinancialReportRow, ReportKey, ReportScope, ReportStatus,
};

/// Why a projection refused an envelope.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to decode {event_type} payload: {source}")]
    Decode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    OutOfOrder(#[from] cursor::OutOfOrder),

    #[error("envelope aggregate id {envelope} does not match payload id {payload}")]
    IdMismatch { envelope: String, payload: String },
}

impl From<ProjectionError> for HandlerError {
    fn from(error: ProjectionError) -> Self {
        match error {
            ProjectionError::Decode { .. } => HandlerError::decode(error),
            ProjectionError::OutOfOrder(_) | ProjectionError::IdMismatch { .. } => {
                HandlerError::rejected(error.to_string())
            }
        }
    }
}

/// One page of read-model rows.
#[derive(Debug, Clone)]
pub struct Paged<T> {
    pub items: Vec<T>,
    /// Matching rows across all pages.
    pub total: u64,
    pub has_more: bool,
}

/// A projection that can be rebuilt from the full event log.
///
/// Used by maintenance: clear the rows and cursors, then re-apply the whole
/// log in stream order.
pub trait Rebuildable: Send + Sync {
    fn projection_name(&self) -> &'static str;

    fn rebuild_from_scratch(&self, envelopes: Vec<EventEnvelope>) -> Result<(), ProjectionError>;
}

/// Stream-order sort shared by every rebuild: aggregate by aggregate, each
/// stream version-ascending.
pub(crate) fn sort_for_rebuild(envelopes: &mut [EventEnvelope]) {
    envelopes.sort_by(|a, b| {
        a.aggregate_id()
            .cmp(b.aggregate_id())
            .then(a.version().cmp(&b.version()))
    });
}
