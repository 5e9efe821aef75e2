use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::broker::{BrokerChannel, MessageEnvelope};
use crate::error::{BrokerError, DispatchError};
use crate::events::{Bus, Event, EventKind};
use crate::handlers::{DeliveryInfo, HandlerRegistry};

/// Body that cancels the consumer instead of being handled.
pub const QUIT_SENTINEL: &[u8] = b"quit";

/// How a delivery was settled.
#[derive(Debug)]
pub enum Settlement {
    /// Handler returned `true`; delivery acknowledged.
    Acked,
    /// Delivery rejected without requeue. `None` means the handler returned `false`.
    Rejected(Option<DispatchError>),
    /// Quit sentinel; consumer cancelled, delivery left unsettled.
    Cancelled,
}

impl Settlement {
    pub fn is_acked(&self) -> bool {
        matches!(self, Settlement::Acked)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Settlement::Rejected(_))
    }
}

/// Per-queue dispatcher.
pub struct Dispatcher {
    queue: Arc<str>,
    registry: HandlerRegistry,
    bus: Bus,
    auto_ack: bool,
    debug: bool,
    default_exchange: Option<String>,
}

impl Dispatcher {
    /// Creates a dispatcher for deliveries consumed from `queue`.
    pub fn new(queue: impl Into<Arc<str>>, registry: HandlerRegistry, bus: Bus) -> Self {
        Self {
            queue: queue.into(),
            registry,
            bus,
            auto_ack: false,
            debug: false,
            default_exchange: None,
        }
    }

    /// Consumer runs with `no_ack`: decisions are reported but not sent to the broker.
    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    /// Logs every decoded body at debug level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Default exchange handed to handlers for replies.
    pub fn with_default_exchange(mut self, exchange: Option<String>) -> Self {
        self.default_exchange = exchange;
        self
    }

    /// Queue this dispatcher serves.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Handles one delivery and settles it.
    ///
    /// # Errors
    /// Only transport faults from the ack / nack / cancel call.
    pub async fn dispatch(
        &self,
        channel: &dyn BrokerChannel,
        envelope: MessageEnvelope,
    ) -> Result<Settlement, BrokerError> {
        if envelope.body() == QUIT_SENTINEL {
            channel.cancel(envelope.consumer_tag()).await?;
            info!(queue = %self.queue, consumer_tag = envelope.consumer_tag(), "quit received, consumer cancelled");
            self.bus.publish(
                self.event(EventKind::ConsumerCancelled, &envelope)
                    .with_reason(envelope.consumer_tag()),
            );
            return Ok(Settlement::Cancelled);
        }

        let body: Value = match serde_json::from_slice(envelope.body()) {
            Ok(v) => v,
            Err(e) => {
                let err = DispatchError::Decode {
                    error: e.to_string(),
                };
                return self.reject(channel, &envelope, None, Some(err)).await;
            }
        };

        let (method, handler) = match self.registry.resolve(envelope.routing_key()) {
            Ok(found) => found,
            Err(err) => return self.reject(channel, &envelope, None, Some(err)).await,
        };

        if self.debug {
            debug!(queue = %self.queue, method = %method, body = %body, "decoded delivery");
        }

        let info = DeliveryInfo {
            exchange: envelope.exchange().to_string(),
            queue: self.queue.to_string(),
            routing_key: envelope.routing_key().to_string(),
            reply_to: envelope.reply_to().map(str::to_string),
            message_id: envelope.message_id().map(str::to_string),
            default_exchange: self.default_exchange.clone(),
        };

        let outcome = std::panic::AssertUnwindSafe(async move { handler.handle(body, info).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(true)) => {
                if !self.auto_ack {
                    channel.ack(envelope.delivery_tag()).await?;
                }
                debug!(queue = %self.queue, method = %method, tag = envelope.delivery_tag(), "acked");
                self.bus.publish(
                    self.event(EventKind::DeliveryAcked, &envelope)
                        .with_method(method.as_str()),
                );
                Ok(Settlement::Acked)
            }
            Ok(Ok(false)) => self.reject(channel, &envelope, Some(&method), None).await,
            Ok(Err(e)) => {
                let err = DispatchError::Handling {
                    error: e.to_string(),
                };
                self.reject(channel, &envelope, Some(&method), Some(err)).await
            }
            Err(panic) => {
                let info = if let Some(msg) = panic.downcast_ref::<&'static str>() {
                    (*msg).to_string()
                } else if let Some(msg) = panic.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "unknown panic".to_string()
                };
                let err = DispatchError::Panicked { info };
                self.reject(channel, &envelope, Some(&method), Some(err)).await
            }
        }
    }

    async fn reject(
        &self,
        channel: &dyn BrokerChannel,
        envelope: &MessageEnvelope,
        method: Option<&str>,
        err: Option<DispatchError>,
    ) -> Result<Settlement, BrokerError> {
        if !self.auto_ack {
            channel.nack(envelope.delivery_tag()).await?;
        }

        let body = envelope.body_text();
        let reason = err
            .as_ref()
            .map_or_else(|| "handler declined".to_string(), DispatchError::as_message);
        let label = err.as_ref().map_or("dispatch_declined", DispatchError::as_label);
        warn!(
            method = method.unwrap_or(""),
            exchange = envelope.exchange(),
            queue = %self.queue,
            routing_key = envelope.routing_key(),
            body = %body,
            label,
            "{reason}"
        );

        let mut ev = self
            .event(EventKind::DeliveryRejected, envelope)
            .with_reason(reason);
        if let Some(m) = method {
            ev = ev.with_method(m);
        }
        self.bus.publish(ev);
        Ok(Settlement::Rejected(err))
    }

    fn event(&self, kind: EventKind, envelope: &MessageEnvelope) -> Event {
        let mut ev = Event::new(kind)
            .with_exchange(envelope.exchange())
            .with_queue(Arc::clone(&self.queue))
            .with_routing_key(envelope.routing_key())
            .with_body(envelope.body_text());
        if let Some(id) = envelope.message_id() {
            ev = ev.with_message_id(id);
        }
        ev
    }
}
