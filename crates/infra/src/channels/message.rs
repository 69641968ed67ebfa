//! The unit that moves through a category channel.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use aurum_audit::EventCategory;
use aurum_events::EventEnvelope;

/// One routed copy of a stored audit event.
///
/// A fanned-out event (e.g. a `DELETE`) produces one message per category,
/// each carrying the same envelope. `high_priority` is advisory metadata for
/// consumers that maintain expedited lanes; delivery order is unaffected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub category: EventCategory,
    pub high_priority: bool,
    pub envelope: EventEnvelope,
}

/// Transport-level failure while moving a message.
///
/// These surface to the router as handler errors: logged at the dispatch
/// site, never fatal to the publish that triggered routing. The stored event
/// is the source of truth; an undelivered message is recovered by
/// redelivery or rebuild.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport connection error: {0}")]
    Connection(String),

    #[error("transport command failed: {0}")]
    Command(String),

    #[error("message serialization failed: {0}")]
    Serialization(String),
}

/// Outbound half of a channel transport.
pub trait ChannelPublisher: Send + Sync {
    fn send(&self, category: EventCategory, message: ChannelMessage) -> Result<(), TransportError>;
}

impl<P> ChannelPublisher for Arc<P>
where
    P: ChannelPublisher + ?Sized,
{
    fn send(&self, category: EventCategory, message: ChannelMessage) -> Result<(), TransportError> {
        (**self).send(category, message)
    }
}
