use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::envelope::EventEnvelope;

/// Error raised by an event handler.
///
/// Handler errors are **recovered at the dispatch site**: the publish loop
/// logs them and carries on with the next handler. They never reach the
/// publishing caller as an `Err` and never undo the store append.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The envelope payload could not be decoded into the expected event.
    #[error("failed to decode event payload: {0}")]
    Decode(String),

    /// The handler refused the event (stale version, wrong aggregate, ...).
    #[error("event rejected: {0}")]
    Rejected(String),

    /// The handler started work and failed partway.
    #[error("handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    pub fn decode(err: impl core::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn failed(err: impl core::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Reacts to one published event (projection update, cache invalidation,
/// channel routing, notifications).
///
/// Handlers run synchronously, in registry order, on the publisher's thread.
/// They must tolerate replays: the same envelope may be handed to them more
/// than once.
pub trait EventHandler: Send + Sync {
    /// Stable handler name, used in logs and dispatch receipts.
    fn name(&self) -> &'static str;

    fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError>;
}

impl<H> EventHandler for Arc<H>
where
    H: EventHandler + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        (**self).handle(event)
    }
}

/// One registry entry: a handler plus its dispatch position.
pub struct RegisteredHandler {
    order: i32,
    registration: usize,
    handler: Arc<dyn EventHandler>,
}

impl RegisteredHandler {
    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn name(&self) -> &'static str {
        self.handler.name()
    }

    pub fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        self.handler.handle(event)
    }
}

impl core::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("name", &self.name())
            .field("order", &self.order)
            .field("registration", &self.registration)
            .finish()
    }
}

/// Maps event kinds to ordered handler lists.
///
/// ## Registration
///
/// Hosts build the registry once at startup and then share it read-only
/// (`Arc<HandlerRegistry>`); there is no runtime discovery and no mutation
/// after wiring. A handler that consumes several event kinds registers once
/// per kind.
///
/// ## Dispatch order
///
/// Within one event kind, handlers run in ascending `order`; equal orders run
/// in registration order. The order is total and deterministic, which is what
/// makes dispatch receipts and the pipeline tests meaningful.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<RegisteredHandler>>,
    registrations: usize,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type` at `order` (lower runs first).
    pub fn register(&mut self, event_type: impl Into<String>, order: i32, handler: Arc<dyn EventHandler>) {
        let entry = RegisteredHandler {
            order,
            registration: self.registrations,
            handler,
        };
        self.registrations += 1;

        let slot = self.handlers.entry(event_type.into()).or_default();
        slot.push(entry);
        // Stable sort keeps registration order for equal `order` values.
        slot.sort_by_key(|h| h.order);
    }

    /// Register one handler for several event kinds at the same order.
    pub fn register_many(&mut self, event_types: &[&str], order: i32, handler: Arc<dyn EventHandler>) {
        for event_type in event_types {
            self.register(*event_type, order, handler.clone());
        }
    }

    /// Handlers for an event kind, already in dispatch order. Unknown kinds
    /// get an empty slice, never an error.
    pub fn handlers_for(&self, event_type: &str) -> &[RegisteredHandler] {
        self.handlers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Event kinds with at least one handler (sorted, for diagnostics).
    pub fn handled_event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn registration_count(&self) -> usize {
        self.registrations
    }
}
