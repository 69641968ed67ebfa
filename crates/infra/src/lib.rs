//! Infrastructure layer: event store, dispatch pipeline, read models, channels.
//!
//! Domain crates stay storage-free; everything that touches Postgres, Redis,
//! or in-process read stores lives here. The write path is
//! [`publisher::EventPublisher`] (store, then dispatch); the read paths are
//! the [`projections`] and the [`reconstruction`] engine over the same log.

pub mod channels;
pub mod event_store;
pub mod maintenance;
pub mod metrics;
pub mod projections;
pub mod publisher;
pub mod read_model;
pub mod reconstruction;
pub mod validation;
