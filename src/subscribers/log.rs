//! # LogWriter
//!
//! Renders every [`Event`] through `tracing`. Per-message faults are `warn`, transport and
//! supervision faults `error`, everything else `info` or `debug`.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let exchange = e.exchange.as_deref().unwrap_or("");
        let queue = e.queue.as_deref().unwrap_or("");
        let routing_key = e.routing_key.as_deref().unwrap_or("");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::DeliveryAcked => {
                debug!(exchange, queue, routing_key, method = e.method.as_deref(), "[acked]");
            }
            EventKind::DeliveryRejected => {
                warn!(
                    exchange,
                    queue,
                    routing_key,
                    method = e.method.as_deref(),
                    body = e.body.as_deref(),
                    reason,
                    "[rejected]"
                );
            }
            EventKind::ConsumerCancelled => {
                info!(queue, consumer_tag = reason, "[consumer-cancelled]");
            }
            EventKind::MessagePublished => {
                debug!(
                    exchange,
                    routing_key,
                    method = e.method.as_deref(),
                    message_id = e.message_id.as_deref(),
                    "[published]"
                );
            }
            EventKind::AskAnswered => {
                debug!(exchange, routing_key, message_id = e.message_id.as_deref(), "[ask-answered]");
            }
            EventKind::AskTimedOut => {
                warn!(exchange, routing_key, message_id = e.message_id.as_deref(), reason, "[ask-timeout]");
            }
            EventKind::StateChanged => {
                info!(queue, state = e.state, "[state]");
            }
            EventKind::ShutdownRequested => {
                info!(control = reason, "[shutdown-requested]");
            }
            EventKind::HealthProbe => {
                info!(pid = e.pid, memory_bytes = e.memory_bytes, "[probe]");
            }
            EventKind::ProcessSpawned => {
                info!(queue, pid = e.pid, "[spawned]");
            }
            EventKind::ProcessKilled => {
                info!(queue, pid = e.pid, "[killed]");
            }
            EventKind::SupervisionFailed => {
                error!(queue, pid = e.pid, reason, "[supervision-failed]");
            }
            EventKind::SubscriberOverflow => {
                warn!(subscriber = e.subscriber, reason, "[subscriber-overflow]");
            }
            EventKind::SubscriberPanicked => {
                error!(subscriber = e.subscriber, info = reason, "[subscriber-panicked]");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
