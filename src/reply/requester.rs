use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::broker::{BrokerChannel, ClientRef, OutboundMessage, Payload, Wait};
use crate::config::{Arguments, Config, ConsumerOptions, QueueOptions};
use crate::error::AskError;
use crate::events::{Bus, Event, EventKind};
use crate::reply::pending::PendingRequests;

/// Synchronous request/reply over the broker.
pub struct Requester {
    client: ClientRef,
    config: Arc<Config>,
    bus: Bus,
    pending: PendingRequests,
}

impl Requester {
    pub fn new(client: ClientRef, config: Arc<Config>, bus: Bus) -> Self {
        Self {
            client,
            config,
            bus,
            pending: PendingRequests::new(),
        }
    }

    /// Requests currently waiting for a reply.
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Publishes `payload` to `exchange` / `routing_key` with `reply_to = <queue>` and
    /// waits at most `timeout` for the reply body.
    ///
    /// `queue` is declared with its configured options (defaults if it is not in the
    /// configuration); an empty name lets the broker generate one.
    ///
    /// # Errors
    /// - [`AskError::Timeout`] once `timeout` has elapsed without a reply;
    /// - [`AskError::Busy`] if another call is already waiting on the same reply queue;
    /// - [`AskError::ConsumerGone`] if the reply consumer is cancelled by the broker;
    /// - [`AskError::Broker`] on transport faults (including an empty payload).
    pub async fn ask(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<Payload>,
        timeout: Duration,
    ) -> Result<Vec<u8>, AskError> {
        let deadline = Instant::now() + timeout;
        let message = OutboundMessage::prepare(payload)?;

        let channel = match tokio::time::timeout_at(deadline, self.client.channel()).await {
            Ok(opened) => opened?,
            Err(_) => return Err(self.timed_out(exchange, routing_key, queue, &message, timeout)),
        };

        let attempt = self.ask_on(
            channel.as_ref(),
            queue,
            exchange,
            routing_key,
            message.clone(),
            deadline,
            timeout,
        );
        match tokio::time::timeout_at(deadline, attempt).await {
            Ok(result) => {
                if let Err(e) = channel.close().await {
                    debug!(error = %e, "closing ask channel failed");
                }
                result
            }
            Err(_) => {
                // Close may stall as long as the broker does.
                tokio::spawn(async move {
                    if let Err(e) = channel.close().await {
                        debug!(error = %e, "closing ask channel failed");
                    }
                });
                Err(self.timed_out(exchange, routing_key, queue, &message, timeout))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn ask_on(
        &self,
        channel: &dyn BrokerChannel,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Vec<u8>, AskError> {
        let (options, arguments) = match self.config.queues.get(queue) {
            Some(q) => (q.options, q.arguments.clone()),
            None => (QueueOptions::default(), Arguments::new()),
        };
        let reply_queue = channel.declare_queue(queue, &options, &arguments).await?;
        let slot = self.pending.claim(&reply_queue, deadline)?;

        channel.bind_queue(&reply_queue, exchange, &reply_queue).await?;
        channel
            .consume(&reply_queue, "", &ConsumerOptions::default())
            .await?;

        let message = message.with_reply_to(reply_queue.as_str());
        channel.publish(exchange, routing_key, &message).await?;
        self.bus.publish(
            self.event(EventKind::MessagePublished, exchange, routing_key, &message)
                .with_body(message.body_text())
                .with_method("ask"),
        );

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match channel.wait(Some(remaining)).await? {
                Wait::Delivery(reply) => {
                    channel.ack(reply.delivery_tag()).await?;
                    if self.pending.fulfill(slot.correlation_id(), reply.body().to_vec()) {
                        if let Some(body) = slot.take() {
                            self.bus.publish(
                                self.event(EventKind::AskAnswered, exchange, routing_key, &message)
                                    .with_body(reply.body_text()),
                            );
                            return Ok(body);
                        }
                    }
                }
                Wait::Idle => {}
                Wait::Drained => return Err(AskError::ConsumerGone),
            }
        }

        Err(self.timed_out(exchange, routing_key, &reply_queue, &message, timeout))
    }

    fn timed_out(
        &self,
        exchange: &str,
        routing_key: &str,
        reply_queue: &str,
        message: &OutboundMessage,
        timeout: Duration,
    ) -> AskError {
        warn!(exchange, routing_key, reply_queue, ?timeout, "ask timed out");
        self.bus.publish(
            self.event(EventKind::AskTimedOut, exchange, routing_key, message)
                .with_queue(reply_queue)
                .with_reason(format!("no reply within {timeout:?}")),
        );
        AskError::Timeout { timeout }
    }

    fn event(
        &self,
        kind: EventKind,
        exchange: &str,
        routing_key: &str,
        message: &OutboundMessage,
    ) -> Event {
        Event::new(kind)
            .with_exchange(exchange)
            .with_routing_key(routing_key)
            .with_message_id(message.message_id())
    }
}
