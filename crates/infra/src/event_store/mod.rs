//! Append-only event store boundary.
//!
//! The [`EventStore`] trait is the storage seam: an in-memory implementation
//! backs tests and reconstruction semantics, the Postgres one backs
//! production. Store-then-dispatch ordering lives in the publisher, not here.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::{paginate_filtered, EventFilter, EventPage, EventQuery, Pagination};
pub use r#trait::{EventRecord, EventStore, EventStoreError, PendingEvent};
