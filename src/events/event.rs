//! # Runtime events emitted by workers and the process supervisor.
//!
//! [`EventKind`] falls into four groups:
//! - **Delivery**: settlement outcomes of the dispatcher (acked, rejected, cancelled by sentinel).
//! - **Outbound**: messages published by `send` / `reply` and request/reply outcomes.
//! - **Lifecycle**: consumer state transitions, signals, health probes.
//! - **Supervision**: worker processes spawned / terminated / failures.
//!
//! Each event carries a global, monotonically increasing `seq`.
//!
//! ## Example
//! ```rust
//! use queuevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::DeliveryRejected)
//!     .with_queue("orders")
//!     .with_routing_key("order.created")
//!     .with_reason("handler returned false");
//!
//! assert_eq!(ev.kind, EventKind::DeliveryRejected);
//! assert_eq!(ev.routing_key.as_deref(), Some("order.created"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use serde::Serialize;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked while handling an event (`subscriber`, `reason`).
    SubscriberPanicked,
    /// Subscriber dropped an event because its queue was full or closed (`subscriber`, `reason`).
    SubscriberOverflow,

    // === Delivery events ===
    /// Delivery handled and acknowledged (`exchange`, `queue`, `routing_key`, `method`).
    DeliveryAcked,
    /// Delivery rejected without requeue (`exchange`, `queue`, `routing_key`, `body`, `reason`).
    DeliveryRejected,
    /// Quit sentinel received; consumer cancelled (`queue`, `reason` = consumer tag).
    ConsumerCancelled,

    // === Outbound events ===
    /// Message published (`exchange`, `routing_key`, `body`, `message_id`).
    MessagePublished,
    /// Request/reply call received its answer (`exchange`, `routing_key`, `message_id`).
    AskAnswered,
    /// Request/reply call timed out (`exchange`, `routing_key`, `message_id`).
    AskTimedOut,

    // === Lifecycle events ===
    /// Consumer state changed (`queue`, `state`).
    StateChanged,
    /// OS signal or control request observed (`reason` = control name).
    ShutdownRequested,
    /// Health probe sampled the process (`pid`, `memory_bytes`).
    HealthProbe,

    // === Supervision events ===
    /// Worker process started (`queue`, `pid`).
    ProcessSpawned,
    /// Worker process asked to terminate (`queue`, `pid`).
    ProcessKilled,
    /// Spawn or signal failed (`queue`, `pid`, `reason`).
    SupervisionFailed,
}

impl EventKind {
    /// Stable snake_case label.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::SubscriberPanicked => "subscriber_panicked",
            EventKind::SubscriberOverflow => "subscriber_overflow",
            EventKind::DeliveryAcked => "delivery_acked",
            EventKind::DeliveryRejected => "delivery_rejected",
            EventKind::ConsumerCancelled => "consumer_cancelled",
            EventKind::MessagePublished => "message_published",
            EventKind::AskAnswered => "ask_answered",
            EventKind::AskTimedOut => "ask_timed_out",
            EventKind::StateChanged => "state_changed",
            EventKind::ShutdownRequested => "shutdown_requested",
            EventKind::HealthProbe => "health_probe",
            EventKind::ProcessSpawned => "process_spawned",
            EventKind::ProcessKilled => "process_killed",
            EventKind::SupervisionFailed => "supervision_failed",
        }
    }

    /// Whether this event describes a broker message (journal-worthy).
    pub fn is_message(&self) -> bool {
        matches!(
            self,
            EventKind::DeliveryAcked
                | EventKind::DeliveryRejected
                | EventKind::ConsumerCancelled
                | EventKind::MessagePublished
                | EventKind::AskAnswered
                | EventKind::AskTimedOut
        )
    }
}

/// Runtime event with optional metadata; which fields are set depends on [`EventKind`].
#[derive(Clone, Debug)]
pub struct Event {
    /// Global sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Exchange name.
    pub exchange: Option<Arc<str>>,
    /// Queue name.
    pub queue: Option<Arc<str>>,
    /// Routing key.
    pub routing_key: Option<Arc<str>>,
    /// Message body as text.
    pub body: Option<Arc<str>>,
    /// Message id.
    pub message_id: Option<Arc<str>>,
    /// Handler name derived from the routing key.
    pub method: Option<Arc<str>>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Consumer state label.
    pub state: Option<&'static str>,
    /// Subscriber name (subscriber events).
    pub subscriber: Option<&'static str>,
    /// Process id.
    pub pid: Option<u32>,
    /// Resident memory in bytes (health probe).
    pub memory_bytes: Option<u64>,
}

impl Event {
    /// Creates an event with the current timestamp and the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            exchange: None,
            queue: None,
            routing_key: None,
            body: None,
            message_id: None,
            method: None,
            reason: None,
            state: None,
            subscriber: None,
            pid: None,
            memory_bytes: None,
        }
    }

    #[inline]
    pub fn with_exchange(mut self, exchange: impl Into<Arc<str>>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    #[inline]
    pub fn with_queue(mut self, queue: impl Into<Arc<str>>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    #[inline]
    pub fn with_routing_key(mut self, routing_key: impl Into<Arc<str>>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    #[inline]
    pub fn with_body(mut self, body: impl Into<Arc<str>>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[inline]
    pub fn with_message_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[inline]
    pub fn with_method(mut self, method: impl Into<Arc<str>>) -> Self {
        self.method = Some(method.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_state(mut self, state: &'static str) -> Self {
        self.state = Some(state);
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[inline]
    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"));
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::StateChanged);
        let b = Event::new(EventKind::StateChanged);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_subscriber_events() {
        let ev = Event::subscriber_overflow("journal", "full");
        assert!(ev.is_subscriber_overflow());
        assert_eq!(ev.subscriber, Some("journal"));
        assert_eq!(ev.reason.as_deref(), Some("subscriber=journal reason=full"));

        let ev = Event::subscriber_panicked("log", "boom".into());
        assert!(ev.is_subscriber_panic());
        assert!(!ev.kind.is_message());
    }
}
