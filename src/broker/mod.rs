//! # Broker capabilities.
//!
//! The transport is an external collaborator. The runtime only talks to it through two
//! object-safe traits:
//!
//! - [`BrokerClient`]: one connection: opens channels, closes everything.
//! - [`BrokerChannel`]: declare / bind / publish / consume / ack / nack / cancel / wait / close.
//!
//! ```text
//! BrokerClient (connection) ── open ──► [ BrokerChannel* ] ── close ──► closed
//!                                         │
//!                                         ├─ consume(queue, tag)
//!                                         ├─ wait(timeout) ─► Wait::{Delivery, Idle, Drained}
//!                                         └─ ack / nack / cancel
//! ```
//!
//! ## Implementations
//! - [`MemoryBroker`]: in-process reference broker; records every operation (tests, demos).
//! - `AmqpClient`: `lapin` adapter for AMQP 0-9-1 (feature `amqp`).
//!
//! ## Rules
//! - `wait` must be cancel-safe: dropping the future never loses a delivery.
//! - A channel that returned `Err(ChannelClosed | ConnectionClosed)` is unusable.
//! - `Wait::Drained` means no consumer is active on the channel any more.

#[cfg(feature = "amqp")]
mod amqp;
mod envelope;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{Arguments, ConsumerOptions, ExchangeConfig, ExchangeKind, QueueOptions};
use crate::error::BrokerError;

#[cfg(feature = "amqp")]
pub use amqp::AmqpClient;
pub use envelope::{
    DELAY_HEADER, DeliveryTag, Headers, MessageEnvelope, OutboundMessage, Payload,
};
pub use memory::{BrokerOp, MemoryBroker, MemoryConnection};

/// Shared handle to a channel.
pub type ChannelRef = Arc<dyn BrokerChannel>;

/// Shared handle to a connection.
pub type ClientRef = Arc<dyn BrokerClient>;

/// Outcome of one [`BrokerChannel::wait`] call.
#[derive(Debug)]
pub enum Wait {
    /// A delivery arrived.
    Delivery(MessageEnvelope),
    /// The timeout elapsed without a delivery.
    Idle,
    /// No consumer is active on the channel; nothing will ever arrive.
    Drained,
}

/// One broker connection.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Opens a fresh channel on this connection.
    async fn channel(&self) -> Result<ChannelRef, BrokerError>;

    /// Closes the connection and every channel on it.
    ///
    /// Unacknowledged deliveries are returned to their queues by the broker.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Channel-level primitives.
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Declares an exchange of type `kind` with the flags from `cfg`.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        cfg: &ExchangeConfig,
    ) -> Result<(), BrokerError>;

    /// Declares a queue and returns its name (server-generated when `name` is empty).
    async fn declare_queue(
        &self,
        name: &str,
        options: &QueueOptions,
        arguments: &Arguments,
    ) -> Result<String, BrokerError>;

    /// Binds `queue` to `exchange` for `routing_key`.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Publishes a prepared message.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &OutboundMessage,
    ) -> Result<(), BrokerError>;

    /// Starts a consumer on `queue`; returns the effective consumer tag
    /// (server-generated when `consumer_tag` is empty).
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: &ConsumerOptions,
    ) -> Result<String, BrokerError>;

    /// Blocks until a delivery arrives, the timeout elapses, or no consumer is left.
    ///
    /// `None` waits without a fixed deadline (bounded by broker heartbeats).
    async fn wait(&self, timeout: Option<Duration>) -> Result<Wait, BrokerError>;

    /// Positive acknowledgement.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Negative acknowledgement (no requeue; dead-lettered if the queue is set up for it).
    async fn nack(&self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Cancels a consumer. Deliveries already handed out may still be settled.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    /// Closes the channel; unacknowledged deliveries go back to their queues.
    async fn close(&self) -> Result<(), BrokerError>;
}
