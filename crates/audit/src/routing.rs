//! Category classification of audit events.
//!
//! Routing is a pure, total function over the event: any audit event maps to
//! at least one category, deterministically. The channel topology downstream
//! (one topic per category) never needs to inspect payloads again.

use serde::{Deserialize, Serialize};

use crate::events::{AuditEvent, RiskLevel};

/// Action tags with fixed routing meaning.
pub const DELETE_ACTION: &str = "DELETE";
pub const SYSTEM_ACTION_PREFIX: &str = "SYSTEM_";
pub const SECURITY_ACTIONS: [&str; 4] = ["LOGIN", "LOGOUT", "FAILED_LOGIN", "PERMISSION_DENIED"];

/// The four audit channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Business,
    Security,
    System,
    Compliance,
}

impl EventCategory {
    /// Stable channel/topic name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Business => "business-events",
            EventCategory::Security => "security-events",
            EventCategory::System => "system-events",
            EventCategory::Compliance => "compliance-events",
        }
    }

    pub fn all() -> [EventCategory; 4] {
        [
            EventCategory::Business,
            EventCategory::Security,
            EventCategory::System,
            EventCategory::Compliance,
        ]
    }
}

impl core::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an audit event into its primary category.
///
/// Precedence: compliance kind, then security action set, then the
/// `SYSTEM_` action prefix, then business.
pub fn category_for(event: &AuditEvent) -> EventCategory {
    if matches!(event, AuditEvent::ComplianceAudited(_)) {
        return EventCategory::Compliance;
    }

    let action = event.action();
    if SECURITY_ACTIONS.contains(&action) {
        return EventCategory::Security;
    }
    if action.starts_with(SYSTEM_ACTION_PREFIX) {
        return EventCategory::System;
    }

    EventCategory::Business
}

/// Deletions matter to business audit and to security monitoring alike.
pub fn routes_to_multiple(event: &AuditEvent) -> bool {
    event.action() == DELETE_ACTION
}

/// Every category the event is delivered to, in delivery order.
///
/// Fan-out takes precedence over single-category classification: a `DELETE`
/// goes to business then security, anything else to its primary category.
pub fn categories_for(event: &AuditEvent) -> Vec<EventCategory> {
    if routes_to_multiple(event) {
        vec![EventCategory::Business, EventCategory::Security]
    } else {
        vec![category_for(event)]
    }
}

/// Deletions and high-risk compliance findings are flagged for expedited
/// consumption.
pub fn is_high_priority(event: &AuditEvent) -> bool {
    if event.action() == DELETE_ACTION {
        return true;
    }
    matches!(
        event,
        AuditEvent::ComplianceAudited(e) if e.risk_level == RiskLevel::High
    )
}
