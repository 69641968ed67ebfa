//! In-memory bus for tests and single-process hosts.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Subscription};

#[derive(Debug)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    Poisoned,
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Best-effort fan-out to every live subscriber
/// - At-least-once acceptable (subscribers must be idempotent)
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions still attached (dead ones are pruned lazily
    /// on publish).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn every_subscriber_gets_a_copy() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(7).unwrap();

        assert_eq!(a.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
        assert_eq!(b.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
    }

    #[test]
    fn messages_arrive_in_publish_order() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let sub = bus.subscribe();

        for n in 0..5 {
            bus.publish(n).unwrap();
        }
        for n in 0..5 {
            assert_eq!(sub.recv_timeout(Duration::from_secs(1)).unwrap(), n);
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned_on_publish() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(1).unwrap();

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
    }

    #[test]
    fn subscribing_after_publish_misses_earlier_messages() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        bus.publish(1).unwrap();

        let late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }
}
