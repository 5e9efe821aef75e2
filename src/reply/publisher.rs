use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::broker::{BrokerClient, ChannelRef, OutboundMessage, Payload};
use crate::config::{Config, ExchangeConfig, ExchangeKind};
use crate::error::BrokerError;
use crate::events::{Bus, Event, EventKind};
use crate::handlers::DeliveryInfo;

/// Fire-and-forget publishing on one channel.
pub struct Publisher {
    channel: ChannelRef,
    config: Option<Arc<Config>>,
    bus: Bus,
}

impl Publisher {
    /// Publishes on an existing channel.
    pub fn new(channel: ChannelRef, bus: Bus) -> Self {
        Self {
            channel,
            config: None,
            bus,
        }
    }

    /// Opens a dedicated channel on `client`.
    pub async fn open(client: &dyn BrokerClient, bus: Bus) -> Result<Self, BrokerError> {
        Ok(Self::new(client.channel().await?, bus))
    }

    /// Exchange declarations are taken from `config` when present.
    pub fn with_config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Publishes `payload`. For topic sends the exchange is declared first; direct sends
    /// (replies) publish straight away.
    pub async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<Payload>,
        kind: ExchangeKind,
    ) -> Result<OutboundMessage, BrokerError> {
        let message = OutboundMessage::prepare(payload)?;
        if kind == ExchangeKind::Topic {
            let declared = self
                .config
                .as_deref()
                .and_then(|c| c.exchanges.get(exchange))
                .cloned()
                .unwrap_or_default();
            self.channel
                .declare_exchange(exchange, declared.kind_or(kind), &declared)
                .await?;
        }
        self.publish(exchange, routing_key, message, "send").await
    }

    /// Publishes with `x-delay = delay` (milliseconds) for a delayed-message exchange.
    /// The exchange is not declared.
    pub async fn send_delayed(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<Payload>,
        delay: Duration,
    ) -> Result<OutboundMessage, BrokerError> {
        let message = OutboundMessage::prepare(payload)?.with_delay(delay);
        self.publish(exchange, routing_key, message, "send_delayed").await
    }

    /// Answers a request: direct send to `info.reply_to` on the reply exchange.
    ///
    /// Returns `Ok(None)` when the delivery carried no `reply_to`.
    pub async fn reply(
        &self,
        info: &DeliveryInfo,
        payload: impl Into<Payload>,
    ) -> Result<Option<OutboundMessage>, BrokerError> {
        let Some(reply_to) = info.reply_to.as_deref() else {
            return Ok(None);
        };
        let message = OutboundMessage::prepare(payload)?;
        self.publish(info.reply_exchange(), reply_to, message, "reply")
            .await
            .map(Some)
    }

    /// Closes the underlying channel.
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.channel.close().await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
        method: &'static str,
    ) -> Result<OutboundMessage, BrokerError> {
        self.channel.publish(exchange, routing_key, &message).await?;
        debug!(exchange, routing_key, message_id = message.message_id(), method, "published");
        self.bus.publish(
            Event::new(EventKind::MessagePublished)
                .with_exchange(exchange)
                .with_routing_key(routing_key)
                .with_body(message.body_text())
                .with_message_id(message.message_id())
                .with_method(method),
        );
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerOp, MemoryBroker, MemoryConnection};
    use crate::config::{Arguments, QueueOptions};
    use serde_json::json;

    async fn publisher(broker: &MemoryBroker) -> (MemoryConnection, Publisher) {
        let conn = broker.connect();
        let p = Publisher::open(&conn, Bus::new(8)).await.unwrap();
        (conn, p)
    }

    #[tokio::test]
    async fn test_topic_send_declares_exchange() {
        let broker = MemoryBroker::new();
        let (_conn, p) = publisher(&broker).await;

        let msg = p
            .send("market", "order.created", json!({"id": 1}), ExchangeKind::Topic)
            .await
            .unwrap();

        let ops = broker.ops();
        assert!(matches!(
            &ops[0],
            BrokerOp::DeclareExchange { name, kind: ExchangeKind::Topic } if name == "market"
        ));
        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].2.message_id(), msg.message_id());
        assert_eq!(published[0].2.body(), br#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_empty_message_is_refused() {
        let broker = MemoryBroker::new();
        let (_conn, p) = publisher(&broker).await;
        let err = p
            .send("market", "k", json!([]), ExchangeKind::Topic)
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::EmptyMessage);
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_send_delayed_sets_header_without_declaring() {
        let broker = MemoryBroker::new();
        let (conn, p) = publisher(&broker).await;
        let ch = conn.channel().await.unwrap();
        ch.declare_exchange("delayed", ExchangeKind::Direct, &ExchangeConfig::default())
            .await
            .unwrap();

        p.send_delayed("delayed", "retry", json!({"n": 1}), Duration::from_secs(5))
            .await
            .unwrap();

        let (_, _, msg) = broker.published().remove(0);
        assert_eq!(msg.headers()["x-delay"], json!(5000));
        let declares = broker
            .ops()
            .iter()
            .filter(|op| matches!(op, BrokerOp::DeclareExchange { .. }))
            .count();
        assert_eq!(declares, 1);
    }

    #[tokio::test]
    async fn test_reply_goes_to_reply_queue() {
        let broker = MemoryBroker::new();
        let (conn, p) = publisher(&broker).await;
        let ch = conn.channel().await.unwrap();
        ch.declare_queue("answers", &QueueOptions::default(), &Arguments::new())
            .await
            .unwrap();

        let info = DeliveryInfo {
            exchange: String::new(),
            reply_to: Some("answers".into()),
            ..Default::default()
        };
        assert!(p.reply(&info, "42").await.unwrap().is_some());
        assert_eq!(broker.queue_len("answers"), 1);

        let no_reply = DeliveryInfo::default();
        assert!(p.reply(&no_reply, "42").await.unwrap().is_none());
    }
}
