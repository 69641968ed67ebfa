use chrono::{DateTime, Utc};

/// A domain event: one fact about one aggregate.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution per kind)
/// - designed to be **append-only**
///
/// The set of event kinds is closed. Each kind fixes its `event_type` and
/// `aggregate_type` tags at construction; the handler registry and the
/// channel router key off `event_type`, never off the Rust type.
pub trait DomainEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event kind identifier (e.g. "assets.asset.created").
    fn event_type(&self) -> &'static str;

    /// Stable entity-type tag of the aggregate this event belongs to
    /// (e.g. "assets.asset").
    fn aggregate_type(&self) -> &'static str;

    /// Schema version for this event kind.
    fn schema_version(&self) -> u32 {
        1
    }

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
