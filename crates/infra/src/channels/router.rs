//! Routes stored audit events onto category channels.

use std::sync::Arc;

use tracing::debug;

use aurum_audit::{categories_for, is_high_priority, AuditEvent};
use aurum_events::{EventEnvelope, EventHandler, HandlerError};

use super::message::{ChannelMessage, ChannelPublisher};
use crate::metrics::{metric, MetricsSink, NoopMetrics};

/// Event kinds the router consumes; register it for exactly these.
pub const AUDIT_EVENT_TYPES: [&str; 3] = [
    "audit.trail.recorded",
    "audit.entity_state.changed",
    "audit.compliance.audited",
];

/// Classifies an audit event and sends one [`ChannelMessage`] per category.
///
/// Runs after the projections in the dispatch chain. A transport failure is
/// a handler failure: the publish loop logs it and the stored event remains
/// the recovery point.
pub struct ChannelRouter<P> {
    publisher: P,
    metrics: Arc<dyn MetricsSink>,
}

impl<P> ChannelRouter<P>
where
    P: ChannelPublisher,
{
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl<P> EventHandler for ChannelRouter<P>
where
    P: ChannelPublisher,
{
    fn name(&self) -> &'static str {
        "channel_router"
    }

    fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        if event.aggregate_type() != "audit.trail" {
            return Ok(());
        }

        let audit: AuditEvent = event.decode().map_err(HandlerError::decode)?;
        let high_priority = is_high_priority(&audit);

        for category in categories_for(&audit) {
            let message = ChannelMessage {
                category,
                high_priority,
                envelope: event.clone(),
            };
            self.publisher
                .send(category, message)
                .map_err(HandlerError::failed)?;

            self.metrics.increment(metric::MESSAGES_ROUTED, 1);
            debug!(
                event_id = %event.event_id(),
                category = %category,
                high_priority,
                "audit event routed"
            );
        }

        Ok(())
    }
}
