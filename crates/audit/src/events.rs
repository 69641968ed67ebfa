use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use aurum_events::DomainEvent;

/// Risk classification on compliance audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Event: a plain audit-trail entry was recorded for an entity.
///
/// `entity_type`/`entity_id` reference the audited entity; the event itself
/// is appended to that entity's stream (its `aggregate_id` is the entity id),
/// so audit history and domain history share one version sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailRecorded {
    pub entity_type: String,
    pub entity_id: String,
    /// Action tag, e.g. `CREATE`, `UPDATE`, `DELETE`, `LOGIN`, `SYSTEM_STARTUP`.
    pub action: String,
    pub performed_by: String,
    pub details: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an entity's state changed, with before/after field snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStateChanged {
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub changed_by: String,
    pub old_values: BTreeMap<String, JsonValue>,
    pub new_values: BTreeMap<String, JsonValue>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a compliance audit touched the entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceAudited {
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    /// Regulation or policy the audit was performed under.
    pub regulation: String,
    pub risk_level: RiskLevel,
    pub findings: Option<String>,
    pub auditor: String,
    pub occurred_at: DateTime<Utc>,
}

/// Audit domain events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    TrailRecorded(TrailRecorded),
    EntityStateChanged(EntityStateChanged),
    ComplianceAudited(ComplianceAudited),
}

impl AuditEvent {
    pub fn entity_type(&self) -> &str {
        match self {
            AuditEvent::TrailRecorded(e) => &e.entity_type,
            AuditEvent::EntityStateChanged(e) => &e.entity_type,
            AuditEvent::ComplianceAudited(e) => &e.entity_type,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            AuditEvent::TrailRecorded(e) => &e.entity_id,
            AuditEvent::EntityStateChanged(e) => &e.entity_id,
            AuditEvent::ComplianceAudited(e) => &e.entity_id,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            AuditEvent::TrailRecorded(e) => &e.action,
            AuditEvent::EntityStateChanged(e) => &e.action,
            AuditEvent::ComplianceAudited(e) => &e.action,
        }
    }

    /// Who caused the event (performer, changer or auditor).
    pub fn actor(&self) -> &str {
        match self {
            AuditEvent::TrailRecorded(e) => &e.performed_by,
            AuditEvent::EntityStateChanged(e) => &e.changed_by,
            AuditEvent::ComplianceAudited(e) => &e.auditor,
        }
    }
}

impl DomainEvent for AuditEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::TrailRecorded(_) => "audit.trail.recorded",
            AuditEvent::EntityStateChanged(_) => "audit.entity_state.changed",
            AuditEvent::ComplianceAudited(_) => "audit.compliance.audited",
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "audit.trail"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AuditEvent::TrailRecorded(e) => e.occurred_at,
            AuditEvent::EntityStateChanged(e) => e.occurred_at,
            AuditEvent::ComplianceAudited(e) => e.occurred_at,
        }
    }
}
