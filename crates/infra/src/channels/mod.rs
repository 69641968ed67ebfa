//! Audit event channel routing and consumption.
//!
//! Stored audit events fan out onto category channels (`business-events`,
//! `security-events`, `system-events`, `compliance-events`). The router is a
//! dispatch handler; the transports carry `ChannelMessage`s with explicit
//! acknowledgement; consumers settle each delivery as acked, redelivered or
//! dead-lettered. The in-memory transport backs tests and single-process
//! hosts, the Redis Streams transport (feature `redis`) backs brokered
//! deployments.

pub mod consumer;
pub mod dead_letter;
pub mod message;
#[cfg(feature = "redis")]
pub mod redis_streams;
pub mod router;
pub mod transport;
pub mod worker;

pub use consumer::{
    AuditLogKey, AuditLogRow, ChannelConsumer, ConsumeError, ConsumeOutcome, DEFAULT_MAX_ATTEMPTS,
};
pub use dead_letter::{
    DeadLetterEntry, DeadLetterSink, DeadLetterStats, DeadLetterStatus, InMemoryDeadLetterQueue,
};
pub use message::{ChannelMessage, ChannelPublisher, TransportError};
#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsChannelTransport, RedisStreamsConfig};
pub use router::{ChannelRouter, AUDIT_EVENT_TYPES};
pub use transport::{Acknowledger, Delivery, InMemoryChannelTransport};
pub use worker::{ChannelWorker, WorkerHandle};
