//! `aurum-audit` — audit-trail domain events and channel classification.

pub mod events;
pub mod routing;

pub use events::{AuditEvent, ComplianceAudited, EntityStateChanged, RiskLevel, TrailRecorded};
pub use routing::{
    EventCategory, DELETE_ACTION, SECURITY_ACTIONS, SYSTEM_ACTION_PREFIX, categories_for,
    category_for, is_high_priority, routes_to_multiple,
};
