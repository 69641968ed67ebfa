//! Store-then-dispatch publishing pipeline.
//!
//! [`EventPublisher`] is the single write path: serialize the typed event,
//! append it to the store, then invoke every registered handler in order on
//! the committed envelope. Persistence is the hard part of the contract; a
//! publish call fails only when the append fails. Handler errors are caught,
//! logged and returned in the [`PublishReceipt`], never propagated, so one
//! broken projection cannot lose an already-committed event or starve the
//! handlers after it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{instrument, warn};

use aurum_core::{AggregateId, CorrelationId, ExpectedVersion};
use aurum_events::{DomainEvent, EventEnvelope, HandlerError, HandlerRegistry};

use crate::event_store::{EventRecord, EventStore, EventStoreError, PendingEvent};
use crate::metrics::{metric, MetricsSink, NoopMetrics};

/// One handler that failed during dispatch.
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub error: HandlerError,
}

/// Outcome of one publish call.
///
/// `record` is the committed event; it is durable even when `failures` is
/// non-empty. `dispatched` counts handlers that completed successfully.
#[derive(Debug)]
pub struct PublishReceipt {
    pub record: EventRecord,
    pub dispatched: usize,
    pub failures: Vec<HandlerFailure>,
}

impl PublishReceipt {
    pub fn all_handlers_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Write path of the engine: append to the store, then run handlers.
pub struct EventPublisher<S> {
    store: S,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<dyn MetricsSink>,
}

impl<S> EventPublisher<S>
where
    S: EventStore,
{
    pub fn new(store: S, registry: Arc<HandlerRegistry>) -> Self {
        Self::with_metrics(store, registry, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(
        store: S,
        registry: Arc<HandlerRegistry>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Serialize a typed event and publish it.
    pub fn publish_typed<E>(
        &self,
        aggregate_id: impl Into<AggregateId>,
        correlation_id: CorrelationId,
        event: &E,
    ) -> Result<PublishReceipt, EventStoreError>
    where
        E: DomainEvent + Serialize,
    {
        let pending = PendingEvent::from_typed(aggregate_id, correlation_id, event)?;
        self.publish(pending)
    }

    /// Publish without a version expectation (the common case for an
    /// append-only audit feed).
    pub fn publish(&self, pending: PendingEvent) -> Result<PublishReceipt, EventStoreError> {
        self.publish_expecting(pending, ExpectedVersion::Any)
    }

    /// Publish with optimistic concurrency: the append is rejected when the
    /// stream head does not match `expected_version`, and no handler runs.
    #[instrument(
        skip(self, pending),
        fields(
            aggregate_id = %pending.aggregate_id,
            event_type = %pending.event_type,
        ),
        err
    )]
    pub fn publish_expecting(
        &self,
        pending: PendingEvent,
        expected_version: ExpectedVersion,
    ) -> Result<PublishReceipt, EventStoreError> {
        let mut records = self.store.append(vec![pending], expected_version)?;
        self.metrics.increment(metric::EVENTS_STORED, 1);

        // append returns exactly the batch it was given
        let record = records
            .pop()
            .ok_or_else(|| EventStoreError::Storage("append returned no records".into()))?;

        Ok(self.dispatch(record))
    }

    fn dispatch(&self, record: EventRecord) -> PublishReceipt {
        let started = std::time::Instant::now();
        let envelope = record.to_envelope();
        let handlers = self.registry.handlers_for(envelope.event_type());

        let mut dispatched = 0;
        let mut failures = Vec::new();

        for handler in handlers {
            match handler.handle(&envelope) {
                Ok(()) => dispatched += 1,
                Err(error) => {
                    warn!(
                        handler = handler.name(),
                        event_id = %envelope.event_id(),
                        event_type = envelope.event_type(),
                        %error,
                        "event handler failed; continuing with remaining handlers"
                    );
                    failures.push(HandlerFailure {
                        handler: handler.name(),
                        error,
                    });
                }
            }
        }

        self.metrics.increment(metric::EVENTS_DISPATCHED, dispatched as u64);
        if !failures.is_empty() {
            self.metrics
                .increment(metric::HANDLER_FAILURES, failures.len() as u64);
        }
        self.metrics
            .observe_duration(metric::DISPATCH_DURATION, started.elapsed());

        PublishReceipt {
            record,
            dispatched,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::metrics::InMemoryMetrics;
    use aurum_assets::{AssetCreated, AssetEvent, AssetId};
    use aurum_events::EventHandler;
    use chrono::Utc;
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        seen: Arc<Mutex<Vec<(String, u64)>>>,
    }

    impl EventHandler for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
            self.seen
                .lock()
                .unwrap()
                .push((self.name.to_string(), envelope.version()));
            Ok(())
        }
    }

    struct AlwaysFails;

    impl EventHandler for AlwaysFails {
        fn name(&self) -> &'static str {
            "always_fails"
        }

        fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
            Err(HandlerError::failed("simulated outage"))
        }
    }

    fn created_event() -> AssetEvent {
        AssetEvent::AssetCreated(AssetCreated {
            asset_id: AssetId::new("AST-001"),
            name: "Forklift".to_string(),
            category_id: 1,
            cost_minor: 10_000,
            currency: "USD".to_string(),
            purchase_date: Utc::now(),
            location: None,
            occurred_at: Utc::now(),
        })
    }

    fn registry_with(handlers: Vec<(i32, Arc<dyn EventHandler>)>) -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        for (order, handler) in handlers {
            registry.register("assets.asset.created", order, handler);
        }
        Arc::new(registry)
    }

    #[test]
    fn publish_stores_then_dispatches_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(vec![
            (
                20,
                Arc::new(Recording {
                    name: "second",
                    seen: Arc::clone(&seen),
                }) as Arc<dyn EventHandler>,
            ),
            (
                10,
                Arc::new(Recording {
                    name: "first",
                    seen: Arc::clone(&seen),
                }) as Arc<dyn EventHandler>,
            ),
        ]);
        let publisher = EventPublisher::new(InMemoryEventStore::new(), registry);

        let receipt = publisher
            .publish_typed("AST-001", CorrelationId::new(), &created_event())
            .unwrap();

        assert_eq!(receipt.record.version, 1);
        assert_eq!(receipt.dispatched, 2);
        assert!(receipt.all_handlers_succeeded());

        let order: Vec<String> = seen.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(order, vec!["first", "second"]);
        assert_eq!(publisher.store().count().unwrap(), 1);
    }

    #[test]
    fn handler_failure_is_captured_not_propagated() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(vec![
            (10, Arc::new(AlwaysFails) as Arc<dyn EventHandler>),
            (
                20,
                Arc::new(Recording {
                    name: "after_failure",
                    seen: Arc::clone(&seen),
                }) as Arc<dyn EventHandler>,
            ),
        ]);
        let metrics = Arc::new(InMemoryMetrics::new());
        let publisher = EventPublisher::with_metrics(
            InMemoryEventStore::new(),
            registry,
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        );

        let receipt = publisher
            .publish_typed("AST-001", CorrelationId::new(), &created_event())
            .unwrap();

        // The event is durable and later handlers still ran.
        assert_eq!(publisher.store().count().unwrap(), 1);
        assert_eq!(receipt.dispatched, 1);
        assert_eq!(receipt.failures.len(), 1);
        assert_eq!(receipt.failures[0].handler, "always_fails");
        assert_eq!(seen.lock().unwrap().len(), 1);

        assert_eq!(metrics.value(metric::EVENTS_STORED), 1);
        assert_eq!(metrics.value(metric::EVENTS_DISPATCHED), 1);
        assert_eq!(metrics.value(metric::HANDLER_FAILURES), 1);
    }

    #[test]
    fn store_failure_prevents_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(vec![(
            10,
            Arc::new(Recording {
                name: "never_runs",
                seen: Arc::clone(&seen),
            }) as Arc<dyn EventHandler>,
        )]);
        let publisher = EventPublisher::new(InMemoryEventStore::new(), registry);

        let pending =
            PendingEvent::from_typed("AST-001", CorrelationId::new(), &created_event()).unwrap();
        let err = publisher
            .publish_expecting(pending, ExpectedVersion::Exact(7))
            .unwrap_err();

        assert!(matches!(err, EventStoreError::VersionConflict(_)));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(publisher.store().count().unwrap(), 0);
    }

    #[test]
    fn events_without_handlers_still_commit() {
        let publisher =
            EventPublisher::new(InMemoryEventStore::new(), Arc::new(HandlerRegistry::new()));

        let receipt = publisher
            .publish_typed("AST-001", CorrelationId::new(), &created_event())
            .unwrap();

        assert_eq!(receipt.dispatched, 0);
        assert!(receipt.all_handlers_succeeded());
        assert_eq!(publisher.store().count().unwrap(), 1);
    }
}
