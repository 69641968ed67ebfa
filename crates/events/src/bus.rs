//! Message distribution abstraction (mechanics only).
//!
//! The bus is the **transport substrate** underneath the category channels:
//! after an audit event is stored and routed, one copy per category is pushed
//! through a bus and consumed from a [`Subscription`]. The contract is
//! deliberately small:
//!
//! - **Transport-agnostic**: in-memory channels for tests and single-process
//!   hosts, a broker (Redis streams) behind the same seam in production.
//! - **At-least-once**: a message may arrive more than once; consumers are
//!   idempotent and acknowledge explicitly at the channel layer.
//! - **No persistence**: the event store is the source of truth, the bus only
//!   distributes. Losing a bus message never loses the event.
//!
//! Ordering holds within one subscription only; nothing is guaranteed across
//! channels.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to one message stream.
///
/// Each subscription receives a copy of every message published after it was
/// created (broadcast semantics). Consume from a single thread; the worker
/// loop pattern is `recv_timeout` with a short tick so shutdown flags get
/// checked between messages.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Publish/subscribe contract shared by every transport.
///
/// `publish` can fail (poisoned lock, broker unreachable). Events are always
/// persisted before they reach a bus, so a failed publish is recoverable by
/// redelivery or rebuild, never by losing data.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
