//! Background worker that drains one channel subscription.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use aurum_events::Subscription;

use super::consumer::ChannelConsumer;
use super::transport::{Acknowledger, Delivery};
use crate::event_store::EventStore;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Channel worker loop.
///
/// - Drains one subscription on a named thread
/// - Hands each delivery to the consumer, which owns the ack protocol
/// - Checks the shutdown channel between messages (250 ms tick)
#[derive(Debug)]
pub struct ChannelWorker;

impl ChannelWorker {
    pub fn spawn<S, A>(
        name: &'static str,
        subscription: Subscription<Delivery>,
        consumer: ChannelConsumer<S>,
        acknowledger: A,
    ) -> WorkerHandle
    where
        S: EventStore + 'static,
        A: Acknowledger + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, subscription, shutdown_rx, consumer, acknowledger))
            .expect("failed to spawn channel worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn worker_loop<S, A>(
    name: &'static str,
    subscription: Subscription<Delivery>,
    shutdown_rx: mpsc::Receiver<()>,
    consumer: ChannelConsumer<S>,
    acknowledger: A,
) where
    S: EventStore,
    A: Acknowledger,
{
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(tick) {
            Ok(delivery) => {
                let outcome = consumer.process(&delivery, &acknowledger);
                debug!(worker = name, outcome = ?outcome, "delivery settled");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
