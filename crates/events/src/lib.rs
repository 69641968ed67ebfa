//! `aurum-events` — the shared event layer.
//!
//! Domain crates define their event kinds against [`DomainEvent`];
//! infrastructure moves them around as [`EventEnvelope`]s, distributes them
//! over an [`EventBus`] and dispatches them through a [`HandlerRegistry`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::DomainEvent;
pub use handler::{EventHandler, HandlerError, HandlerRegistry, RegisteredHandler};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
