//! In-memory channel transport with explicit acknowledgement.
//!
//! Four category buses plus a pending table. A sent message stays pending
//! until its delivery tag is acked; `redeliver_pending` re-queues whatever
//! is still outstanding with a bumped attempt count, which is how tests
//! exercise at-least-once delivery without a broker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use aurum_audit::EventCategory;
use aurum_events::{EventBus, InMemoryEventBus, Subscription};

use super::message::{ChannelMessage, ChannelPublisher, TransportError};

/// One handed-out copy of a message.
///
/// `attempt` starts at 1 and increases on every redelivery of the same tag.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: String,
    pub attempt: u32,
    pub message: ChannelMessage,
}

/// Consumer-side acknowledgement seam.
///
/// Acking an unknown tag is a no-op: after a redelivery race the same tag
/// can legitimately be acked twice.
pub trait Acknowledger: Send + Sync {
    fn ack(&self, delivery_tag: &str) -> Result<(), TransportError>;
}

impl<A> Acknowledger for Arc<A>
where
    A: Acknowledger + ?Sized,
{
    fn ack(&self, delivery_tag: &str) -> Result<(), TransportError> {
        (**self).ack(delivery_tag)
    }
}

#[derive(Debug, Clone)]
struct PendingDelivery {
    category: EventCategory,
    attempt: u32,
    message: ChannelMessage,
}

/// Broker stand-in for tests and single-process hosts.
#[derive(Debug)]
pub struct InMemoryChannelTransport {
    buses: BTreeMap<EventCategory, InMemoryEventBus<Delivery>>,
    pending: Mutex<BTreeMap<u64, PendingDelivery>>,
    next_tag: AtomicU64,
    acked: AtomicU64,
}

impl InMemoryChannelTransport {
    pub fn new() -> Self {
        let buses = EventCategory::all()
            .into_iter()
            .map(|category| (category, InMemoryEventBus::new()))
            .collect();

        Self {
            buses,
            pending: Mutex::new(BTreeMap::new()),
            next_tag: AtomicU64::new(1),
            acked: AtomicU64::new(0),
        }
    }

    /// Subscription to one category channel. Messages sent before the
    /// subscription existed are not replayed.
    pub fn subscribe(&self, category: EventCategory) -> Subscription<Delivery> {
        self.bus(category).subscribe()
    }

    /// Re-queue every unacked delivery on `category` with `attempt + 1`.
    /// Returns how many were redelivered.
    pub fn redeliver_pending(&self, category: EventCategory) -> usize {
        let Ok(mut pending) = self.pending.lock() else {
            return 0;
        };

        let mut redelivered = 0;
        for (tag, entry) in pending.iter_mut() {
            if entry.category != category {
                continue;
            }
            entry.attempt += 1;
            let delivery = Delivery {
                delivery_tag: tag.to_string(),
                attempt: entry.attempt,
                message: entry.message.clone(),
            };
            if self.bus(category).publish(delivery).is_ok() {
                redelivered += 1;
            }
        }
        redelivered
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn pending_count_for(&self, category: EventCategory) -> usize {
        self.pending
            .lock()
            .map(|p| p.values().filter(|e| e.category == category).count())
            .unwrap_or(0)
    }

    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    fn bus(&self, category: EventCategory) -> &InMemoryEventBus<Delivery> {
        // The map is built over EventCategory::all() and never mutated.
        &self.buses[&category]
    }
}

impl Default for InMemoryChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelPublisher for InMemoryChannelTransport {
    fn send(&self, category: EventCategory, message: ChannelMessage) -> Result<(), TransportError> {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);

        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| TransportError::Command("pending table lock poisoned".to_string()))?;
            pending.insert(
                tag,
                PendingDelivery {
                    category,
                    attempt: 1,
                    message: message.clone(),
                },
            );
        }

        let delivery = Delivery {
            delivery_tag: tag.to_string(),
            attempt: 1,
            message,
        };
        self.bus(category)
            .publish(delivery)
            .map_err(|e| TransportError::Command(format!("channel publish failed: {e:?}")))
    }
}

impl Acknowledger for InMemoryChannelTransport {
    fn ack(&self, delivery_tag: &str) -> Result<(), TransportError> {
        let Ok(tag) = delivery_tag.parse::<u64>() else {
            return Ok(());
        };

        let mut pending = self
            .pending
            .lock()
            .map_err(|_| TransportError::Command("pending table lock poisoned".to_string()))?;
        if pending.remove(&tag).is_some() {
            self.acked.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
