use std::collections::HashMap;
use std::sync::RwLock;

use aurum_core::AggregateId;

/// Outcome of a cursor check for one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCheck {
    /// The envelope is the next unapplied version; apply it.
    Apply,
    /// The envelope's version was already applied; skip silently.
    AlreadyApplied,
}

/// Per-aggregate version cursors enforcing ordered, idempotent application.
///
/// A projection applies version `n` of a stream only after `n - 1`:
/// redelivered versions are skipped, gaps are refused (the projection must
/// not guess at missing state). Cursors advance only after the row upsert
/// succeeded.
#[derive(Debug, Default)]
pub struct VersionCursors {
    inner: RwLock<HashMap<AggregateId, u64>>,
}

impl VersionCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, aggregate_id: &AggregateId) -> u64 {
        match self.inner.read() {
            Ok(cursors) => cursors.get(aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Decide whether `version` may be applied for `aggregate_id`.
    ///
    /// Version 0 never exists in a stream and is rejected outright. A gap
    /// (`version > cursor + 1`) is an out-of-order delivery the projection
    /// refuses rather than corrupt its rows.
    pub fn check(
        &self,
        aggregate_id: &AggregateId,
        version: u64,
    ) -> Result<CursorCheck, OutOfOrder> {
        let last = self.position(aggregate_id);

        if version == 0 {
            return Err(OutOfOrder {
                aggregate_id: aggregate_id.clone(),
                last,
                found: 0,
            });
        }
        if version <= last {
            return Ok(CursorCheck::AlreadyApplied);
        }
        if version != last + 1 {
            return Err(OutOfOrder {
                aggregate_id: aggregate_id.clone(),
                last,
                found: version,
            });
        }
        Ok(CursorCheck::Apply)
    }

    pub fn advance(&self, aggregate_id: &AggregateId, version: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert(aggregate_id.clone(), version);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.clear();
        }
    }
}

/// An envelope arrived out of stream order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("out-of-order event for {aggregate_id}: last applied version {last}, got {found}")]
pub struct OutOfOrder {
    pub aggregate_id: AggregateId,
    pub last: u64,
    pub found: u64,
}
