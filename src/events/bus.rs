//! # Event bus.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]: publishing never blocks the consume loop.
//!
//! ```text
//! Dispatcher ──┐
//! Listener   ──┼──► Bus (ring buffer) ──► SubscriberSet ──► LogWriter / JournalWriter / ...
//! Supervisor ──┘
//! ```
//!
//! ## Rules
//! - `publish()` never waits; with no receiver the event is dropped.
//! - Capacity is shared by all receivers; a receiver that falls behind observes
//!   `RecvError::Lagged(n)` and skips the `n` oldest events.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Bus {
    /// Creates a bus holding at most `capacity` undelivered events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to every current receiver.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
