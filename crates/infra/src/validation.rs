//! Envelope validation seam for channel consumers.
//!
//! Consumers validate a delivery before persisting its side effects. A
//! rejection is non-retryable: the message goes to the dead letter queue and
//! is acknowledged, because redelivering a malformed payload can never
//! succeed.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use aurum_audit::AuditEvent;
use aurum_events::EventEnvelope;

/// One field that failed a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub field: String,
    pub message: String,
}

impl ConstraintViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All constraints an envelope failed, reported together.
#[derive(Debug, Clone, Error)]
#[error("envelope failed validation: {}", format_violations(violations))]
pub struct ValidationRejection {
    pub violations: Vec<ConstraintViolation>,
}

fn format_violations(violations: &[ConstraintViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validates envelopes before a consumer persists them.
pub trait EventValidator: Send + Sync {
    fn validate(&self, envelope: &EventEnvelope) -> Result<(), ValidationRejection>;
}

impl<V> EventValidator for Arc<V>
where
    V: EventValidator + ?Sized,
{
    fn validate(&self, envelope: &EventEnvelope) -> Result<(), ValidationRejection> {
        (**self).validate(envelope)
    }
}

/// Structural checks that apply to every envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeValidator;

impl EnvelopeValidator {
    fn check(envelope: &EventEnvelope, violations: &mut Vec<ConstraintViolation>) {
        if envelope.aggregate_id().is_empty() {
            violations.push(ConstraintViolation::new("aggregate_id", "must not be empty"));
        }
        if envelope.event_type().is_empty() {
            violations.push(ConstraintViolation::new("event_type", "must not be empty"));
        }
        if envelope.version() == 0 {
            violations.push(ConstraintViolation::new("version", "must be at least 1"));
        }
        if !envelope.payload().is_object() {
            violations.push(ConstraintViolation::new("payload", "must be a JSON object"));
        }
    }
}

impl EventValidator for EnvelopeValidator {
    fn validate(&self, envelope: &EventEnvelope) -> Result<(), ValidationRejection> {
        let mut violations = Vec::new();
        Self::check(envelope, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationRejection { violations })
        }
    }
}

/// Envelope checks plus audit-payload field checks.
///
/// Audit records feed compliance reporting, so an audit payload missing its
/// entity reference or action is rejected outright rather than stored with
/// holes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditEventValidator;

impl EventValidator for AuditEventValidator {
    fn validate(&self, envelope: &EventEnvelope) -> Result<(), ValidationRejection> {
        let mut violations = Vec::new();
        EnvelopeValidator::check(envelope, &mut violations);

        if envelope.event_type().starts_with("audit.") {
            match envelope.decode::<AuditEvent>() {
                Ok(event) => {
                    if event.entity_type().is_empty() {
                        violations
                            .push(ConstraintViolation::new("entity_type", "must not be empty"));
                    }
                    if event.entity_id().is_empty() {
                        violations.push(ConstraintViolation::new("entity_id", "must not be empty"));
                    }
                    if event.action().is_empty() {
                        violations.push(ConstraintViolation::new("action", "must not be empty"));
                    }
                }
                Err(e) => {
                    violations.push(ConstraintViolation::new(
                        "payload",
                        format!("audit payload does not decode: {e}"),
                    ));
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationRejection { violations })
        }
    }
}
