//! Channel consumer: validate, persist, acknowledge.
//!
//! One consumer per channel, each progressing independently; ordering holds
//! within its channel only. The ack protocol encodes the failure taxonomy:
//!
//! - success: effects persisted, then ack;
//! - transient failure: **no ack**, retry counter bumped, the broker
//!   redelivers later;
//! - non-retryable failure: dead-letter entry first, then exactly one ack,
//!   so the message stops circulating but is never silently dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use aurum_audit::{AuditEvent, EventCategory};
use aurum_core::EventId;

use super::dead_letter::DeadLetterSink;
use super::transport::{Acknowledger, Delivery};
use crate::event_store::{EventStore, EventStoreError};
use crate::metrics::{metric, MetricsSink, NoopMetrics};
use crate::read_model::ReadStore;
use crate::validation::{ConstraintViolation, EventValidator, ValidationRejection};

/// Attempts beyond this dead-letter instead of redelivering forever.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Consumer-side audit log row, keyed per channel so a fanned-out event
/// leaves one row on every channel that received it.
pub type AuditLogKey = (EventId, EventCategory);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogRow {
    pub event_id: EventId,
    pub channel: EventCategory,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub actor: String,
    pub high_priority: bool,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

/// What became of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Processed and acknowledged.
    Acked,
    /// Left unacked for the broker to redeliver.
    Redelivered,
    /// Parked on the dead-letter queue, then acknowledged.
    DeadLettered,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    /// Constraint violations; retrying cannot fix the message.
    #[error("message validation failed: {0:?}")]
    Validation(Vec<ConstraintViolation>),

    /// Infrastructure hiccup; the same message may succeed later.
    #[error("transient consumer failure: {0}")]
    Transient(String),

    /// Broken beyond retry (undecodable payload, unknown event).
    #[error("fatal consumer failure: {0}")]
    Fatal(String),
}

impl From<ValidationRejection> for ConsumeError {
    fn from(rejection: ValidationRejection) -> Self {
        ConsumeError::Validation(rejection.violations)
    }
}

/// Processes deliveries from one category channel.
pub struct ChannelConsumer<S> {
    channel: EventCategory,
    store: S,
    log: Arc<dyn ReadStore<AuditLogKey, AuditLogRow>>,
    validator: Arc<dyn EventValidator>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<dyn MetricsSink>,
    max_attempts: u32,
}

impl<S> ChannelConsumer<S>
where
    S: EventStore,
{
    pub fn new(
        channel: EventCategory,
        store: S,
        log: Arc<dyn ReadStore<AuditLogKey, AuditLogRow>>,
        validator: Arc<dyn EventValidator>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            channel,
            store,
            log,
            validator,
            dead_letters,
            metrics: Arc::new(NoopMetrics),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn channel(&self) -> EventCategory {
        self.channel
    }

    /// Process one delivery and settle it according to the outcome.
    pub fn process(&self, delivery: &Delivery, acknowledger: &dyn Acknowledger) -> ConsumeOutcome {
        if delivery.attempt > self.max_attempts {
            let reason = format!("delivery attempts exhausted ({})", delivery.attempt);
            return self.dead_letter(delivery, &reason, acknowledger);
        }

        match self.validate_and_persist(delivery) {
            Ok(()) => {
                self.ack(delivery, acknowledger);
                debug!(
                    channel = %self.channel,
                    event_id = %delivery.message.envelope.event_id(),
                    attempt = delivery.attempt,
                    "delivery processed"
                );
                ConsumeOutcome::Acked
            }
            Err(ConsumeError::Transient(reason)) => {
                warn!(
                    channel = %self.channel,
                    event_id = %delivery.message.envelope.event_id(),
                    attempt = delivery.attempt,
                    reason,
                    "transient failure, leaving delivery unacked"
                );
                if let Err(err) = self.store.increment_retry(delivery.message.envelope.event_id())
                {
                    warn!(
                        channel = %self.channel,
                        error = %err,
                        "failed to record retry"
                    );
                }
                ConsumeOutcome::Redelivered
            }
            Err(err) => self.dead_letter(delivery, &err.to_string(), acknowledger),
        }
    }

    fn validate_and_persist(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        let envelope = &delivery.message.envelope;
        self.validator.validate(envelope)?;

        let audit: AuditEvent = envelope
            .decode()
            .map_err(|e| ConsumeError::Fatal(format!("undecodable audit payload: {e}")))?;

        let key = (envelope.event_id(), self.channel);
        let row = AuditLogRow {
            event_id: envelope.event_id(),
            channel: self.channel,
            entity_type: audit.entity_type().to_string(),
            entity_id: audit.entity_id().to_string(),
            action: audit.action().to_string(),
            actor: audit.actor().to_string(),
            high_priority: delivery.message.high_priority,
            occurred_at: envelope.occurred_at(),
            recorded_at: Utc::now(),
        };
        self.log.upsert(key, row);

        self.store
            .mark_processed(envelope.event_id())
            .map_err(|err| match err {
                EventStoreError::NotFound(id) => {
                    ConsumeError::Fatal(format!("event {id} is not in the store"))
                }
                other => ConsumeError::Transient(other.to_string()),
            })?;

        Ok(())
    }

    fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: &str,
        acknowledger: &dyn Acknowledger,
    ) -> ConsumeOutcome {
        self.dead_letters
            .push(delivery.message.clone(), reason, delivery.attempt);
        self.metrics.increment(metric::MESSAGES_DEAD_LETTERED, 1);
        self.ack(delivery, acknowledger);
        ConsumeOutcome::DeadLettered
    }

    fn ack(&self, delivery: &Delivery, acknowledger: &dyn Acknowledger) {
        if let Err(err) = acknowledger.ack(&delivery.delivery_tag) {
            warn!(
                channel = %self.channel,
                delivery_tag = %delivery.delivery_tag,
                error = %err,
                "acknowledgement failed, broker will redeliver"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::dead_letter::InMemoryDeadLetterQueue;
    use crate::channels::message::{ChannelMessage, ChannelPublisher};
    use crate::channels::transport::InMemoryChannelTransport;
    use crate::event_store::{InMemoryEventStore, PendingEvent};
    use crate::metrics::InMemoryMetrics;
    use crate::read_model::InMemoryReadStore;
    use crate::validation::AuditEventValidator;
    use aurum_audit::TrailRecorded;
    use aurum_core::{CorrelationId, ExpectedVersion};
    use aurum_events::DomainEvent;
    use std::time::Duration;

    struct Harness {
        store: Arc<InMemoryEventStore>,
        transport: Arc<InMemoryChannelTransport>,
        log: Arc<InMemoryReadStore<AuditLogKey, AuditLogRow>>,
        dead_letters: Arc<InMemoryDeadLetterQueue>,
        metrics: Arc<InMemoryMetrics>,
        consumer: ChannelConsumer<Arc<InMemoryEventStore>>,
    }

    fn harness(channel: EventCategory) -> Harness {
        let store = Arc::new(InMemoryEventStore::new());
        let transport = Arc::new(InMemoryChannelTransport::new());
        let log = Arc::new(InMemoryReadStore::new());
        let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let consumer = ChannelConsumer::new(
            channel,
            store.clone(),
            log.clone(),
            Arc::new(AuditEventValidator),
            dead_letters.clone(),
        )
        .with_metrics(metrics.clone());

        Harness {
            store,
            transport,
            log,
            dead_letters,
            metrics,
            consumer,
        }
    }

    fn trail(action: &str) -> AuditEvent {
        AuditEvent::TrailRecorded(TrailRecorded {
            entity_type: "assets.asset".to_string(),
            entity_id: "AST-001".to_string(),
            action: action.to_string(),
            performed_by: "jdoe".to_string(),
            details: None,
            occurred_at: Utc::now(),
        })
    }

    /// Store the event, route a copy onto the channel, hand back the delivery.
    fn stored_delivery(h: &Harness, channel: EventCategory, event: &AuditEvent) -> Delivery {
        let pending = PendingEvent::from_typed("AST-001", CorrelationId::new(), event).unwrap();
        let records = h
            .store
            .append(vec![pending], ExpectedVersion::Any)
            .unwrap();

        let sub = h.transport.subscribe(channel);
        h.transport
            .send(
                channel,
                ChannelMessage {
                    category: channel,
                    high_priority: false,
                    envelope: records[0].to_envelope(),
                },
            )
            .unwrap();
        sub.recv_timeout(Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn valid_delivery_persists_a_row_and_acks() {
        let h = harness(EventCategory::Business);
        let delivery = stored_delivery(&h, EventCategory::Business, &trail("CREATE"));
        let event_id = delivery.message.envelope.event_id();

        let outcome = h.consumer.process(&delivery, h.transport.as_ref());

        assert_eq!(outcome, ConsumeOutcome::Acked);
        assert_eq!(h.transport.pending_count(), 0);

        let row = h.log.get(&(event_id, EventCategory::Business)).unwrap();
        assert_eq!(row.entity_id, "AST-001");
        assert_eq!(row.action, "CREATE");
        assert_eq!(row.actor, "jdoe");

        let record = h.store.find_by_event_id(event_id).unwrap().unwrap();
        assert!(record.processed);
    }

    #[test]
    fn transient_failure_leaves_delivery_unacked_and_bumps_retry() {
        let h = harness(EventCategory::Business);
        let delivery = stored_delivery(&h, EventCategory::Business, &trail("CREATE"));
        let event_id = delivery.message.envelope.event_id();

        // A consumer whose event store is empty: mark_processed fails as
        // NotFound, so force a transient path with a closed store instead.
        struct DownStore;
        impl EventStore for DownStore {
            fn append(
                &self,
                _events: Vec<PendingEvent>,
                _expected: ExpectedVersion,
            ) -> Result<Vec<crate::event_store::EventRecord>, EventStoreError> {
                Err(EventStoreError::Storage("store offline".to_string()))
            }
            fn find_by_event_id(
                &self,
                _event_id: EventId,
            ) -> Result<Option<crate::event_store::EventRecord>, EventStoreError> {
                Err(EventStoreError::Storage("store offline".to_string()))
            }
            fn load_stream(
                &self,
                _aggregate_id: &aurum_core::AggregateId,
            ) -> Result<Vec<crate::event_store::EventRecord>, EventStoreError> {
                Err(EventStoreError::Storage("store offline".to_string()))
            }
            fn find_related(
                &self,
                _correlation_id: CorrelationId,
            ) -> Result<Vec<crate::event_store::EventRecord>, EventStoreError> {
                Err(EventStoreError::Storage("store offline".to_string()))
            }
            fn count(&self) -> Result<u64, EventStoreError> {
                Err(EventStoreError::Storage("store offline".to_string()))
            }
            fn find_in_range(
                &self,
                _aggregate_type: Option<&str>,
                _from: DateTime<Utc>,
                _to: DateTime<Utc>,
            ) -> Result<Vec<crate::event_store::EventRecord>, EventStoreError> {
                Err(EventStoreError::Storage("store offline".to_string()))
            }
            fn mark_processed(&self, _event_id: EventId) -> Result<(), EventStoreError> {
                Err(EventStoreError::Storage("store offline".to_string()))
            }
            fn increment_retry(&self, _event_id: EventId) -> Result<u32, EventStoreError> {
                Err(EventStoreError::Storage("store offline".to_string()))
            }
        }

        let consumer = ChannelConsumer::new(
            EventCategory::Business,
            DownStore,
            h.log.clone(),
            Arc::new(AuditEventValidator),
            h.dead_letters.clone(),
        );

        let outcome = consumer.process(&delivery, h.transport.as_ref());

        assert_eq!(outcome, ConsumeOutcome::Redelivered);
        // Never acked: still pending, so the broker redelivers.
        assert_eq!(h.transport.pending_count(), 1);
        assert_eq!(h.dead_letters.count_pending(), 0);
        // The real store never saw a processed mark.
        assert!(!h.store.find_by_event_id(event_id).unwrap().unwrap().processed);
    }

    #[test]
    fn validation_failure_dead_letters_then_acks_once() {
        let h = harness(EventCategory::Business);

        // Audit payload with an empty action fails the validator.
        let bad = AuditEvent::TrailRecorded(TrailRecorded {
            entity_type: "assets.asset".to_string(),
            entity_id: "AST-001".to_string(),
            action: String::new(),
            performed_by: "jdoe".to_string(),
            details: None,
            occurred_at: Utc::now(),
        });
        let delivery = stored_delivery(&h, EventCategory::Business, &bad);

        let outcome = h.consumer.process(&delivery, h.transport.as_ref());

        assert_eq!(outcome, ConsumeOutcome::DeadLettered);
        assert_eq!(h.transport.pending_count(), 0);
        assert_eq!(h.transport.acked_count(), 1);
        assert_eq!(h.dead_letters.count_pending(), 1);
        assert_eq!(h.metrics.value(metric::MESSAGES_DEAD_LETTERED), 1);

        let entry = &h.dead_letters.list_pending()[0];
        assert!(entry.reason.contains("validation"));
        // No consumer-side row for a rejected message.
        assert!(h
            .log
            .get(&(delivery.message.envelope.event_id(), EventCategory::Business))
            .is_none());
    }

    #[test]
    fn exhausted_attempts_dead_letter_instead_of_looping() {
        let h = harness(EventCategory::Business);
        let delivery = stored_delivery(&h, EventCategory::Business, &trail("CREATE"));

        let worn_out = Delivery {
            attempt: DEFAULT_MAX_ATTEMPTS + 1,
            ..delivery
        };
        let outcome = h.consumer.process(&worn_out, h.transport.as_ref());

        assert_eq!(outcome, ConsumeOutcome::DeadLettered);
        let entry = &h.dead_letters.list_pending()[0];
        assert!(entry.reason.contains("exhausted"));
        assert_eq!(entry.attempt, DEFAULT_MAX_ATTEMPTS + 1);
    }

    #[test]
    fn replayed_delivery_is_idempotent() {
        let h = harness(EventCategory::Business);
        let delivery = stored_delivery(&h, EventCategory::Business, &trail("CREATE"));

        assert_eq!(
            h.consumer.process(&delivery, h.transport.as_ref()),
            ConsumeOutcome::Acked
        );
        assert_eq!(
            h.consumer.process(&delivery, h.transport.as_ref()),
            ConsumeOutcome::Acked
        );

        // One row, keyed by event id and channel.
        assert_eq!(h.log.list().len(), 1);
    }
}
