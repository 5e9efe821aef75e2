//! `lapin` adapter for AMQP 0-9-1.
//!
//! One [`AmqpClient`] wraps one `lapin::Connection`. Each channel keeps at most one
//! consumer stream; `wait` polls that stream under a timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::Mutex;

use super::{
    BrokerChannel, BrokerClient, ChannelRef, DeliveryTag, Headers, MessageEnvelope,
    OutboundMessage, Wait,
};
use crate::config::{
    Arguments, BrokerConfig, ConsumerOptions, ExchangeConfig, ExchangeKind, QueueOptions,
};
use crate::error::BrokerError;

const REPLY_SUCCESS: u16 = 200;

/// Unacknowledged deliveries the broker may push ahead of the one being handled.
const PREFETCH: u16 = 1;

/// Prefetch window for a consumer; `None` when the broker does not track acks.
fn prefetch(options: &ConsumerOptions) -> Option<u16> {
    (!options.no_ack).then_some(PREFETCH)
}

/// AMQP connection.
pub struct AmqpClient {
    connection: Connection,
}

impl AmqpClient {
    /// Connects using the broker section of the configuration.
    pub async fn connect(cfg: &BrokerConfig) -> Result<Self, BrokerError> {
        let connection = Connection::connect(&cfg.uri(), ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection {
                error: e.to_string(),
            })?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl BrokerClient for AmqpClient {
    async fn channel(&self) -> Result<ChannelRef, BrokerError> {
        if !self.connection.status().connected() {
            return Err(BrokerError::ConnectionClosed);
        }
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection {
                error: e.to_string(),
            })?;
        Ok(Arc::new(AmqpChannel {
            channel,
            consumer: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "bye")
            .await
            .map_err(|e| BrokerError::Connection {
                error: e.to_string(),
            })
    }
}

struct AmqpChannel {
    channel: Channel,
    consumer: Mutex<Option<Consumer>>,
    cancelled: AtomicBool,
}

impl AmqpChannel {
    fn closed(&self, error: lapin::Error) -> BrokerError {
        match error {
            lapin::Error::InvalidChannelState(_) => BrokerError::ChannelClosed,
            lapin::Error::InvalidConnectionState(_) => BrokerError::ConnectionClosed,
            other => BrokerError::Connection {
                error: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        cfg: &ExchangeConfig,
    ) -> Result<(), BrokerError> {
        let kind = match kind {
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        };
        let options = ExchangeDeclareOptions {
            passive: cfg.passive,
            durable: cfg.durable,
            auto_delete: cfg.auto_delete,
            internal: false,
            nowait: false,
        };
        self.channel
            .exchange_declare(name, kind, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::Declare {
                name: name.to_string(),
                error: e.to_string(),
            })
    }

    async fn declare_queue(
        &self,
        name: &str,
        options: &QueueOptions,
        arguments: &Arguments,
    ) -> Result<String, BrokerError> {
        let flags = QueueDeclareOptions {
            passive: options.passive,
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            nowait: false,
        };
        let queue = self
            .channel
            .queue_declare(name, flags, to_field_table(arguments))
            .await
            .map_err(|e| BrokerError::Declare {
                name: name.to_string(),
                error: e.to_string(),
            })?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Declare {
                name: queue.to_string(),
                error: e.to_string(),
            })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &OutboundMessage,
    ) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default()
            .with_message_id(ShortString::from(message.message_id().to_string()));
        if let Some(reply_to) = message.reply_to() {
            properties = properties.with_reply_to(ShortString::from(reply_to.to_string()));
        }
        if !message.headers().is_empty() {
            properties = properties.with_headers(to_field_table(message.headers()));
        }
        let publish_err = |e: lapin::Error| BrokerError::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            error: e.to_string(),
        };
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                message.body(),
                properties,
            )
            .await
            .map_err(publish_err)?
            .await
            .map_err(publish_err)?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: &ConsumerOptions,
    ) -> Result<String, BrokerError> {
        if let Some(count) = prefetch(options) {
            self.channel
                .basic_qos(count, BasicQosOptions::default())
                .await
                .map_err(|e| BrokerError::Consume {
                    queue: queue.to_string(),
                    error: e.to_string(),
                })?;
        }
        let flags = BasicConsumeOptions {
            no_local: options.no_local,
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            nowait: false,
        };
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, flags, to_field_table(&options.arguments))
            .await
            .map_err(|e| BrokerError::Consume {
                queue: queue.to_string(),
                error: e.to_string(),
            })?;
        let tag = consumer.tag().as_str().to_string();
        *self.consumer.lock().await = Some(consumer);
        self.cancelled.store(false, Ordering::SeqCst);
        Ok(tag)
    }

    async fn wait(&self, timeout: Option<Duration>) -> Result<Wait, BrokerError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(Wait::Drained);
        }
        let mut guard = self.consumer.lock().await;
        let Some(consumer) = guard.as_mut() else {
            return Ok(Wait::Drained);
        };
        let next = match timeout {
            Some(t) => match tokio::time::timeout(t, consumer.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(Wait::Idle),
            },
            None => consumer.next().await,
        };
        match next {
            None => {
                *guard = None;
                Ok(Wait::Drained)
            }
            Some(Err(e)) => Err(self.closed(e)),
            Some(Ok(delivery)) => {
                let props = &delivery.properties;
                let envelope = MessageEnvelope::new(
                    delivery.delivery_tag,
                    delivery.exchange.as_str(),
                    delivery.routing_key.as_str(),
                    delivery.data.clone(),
                )
                .with_consumer_tag(consumer.tag().as_str())
                .with_reply_to(props.reply_to().as_ref().map(|s| s.as_str().to_string()))
                .with_message_id(props.message_id().as_ref().map(|s| s.as_str().to_string()))
                .with_headers(props.headers().as_ref().map(from_field_table).unwrap_or_default())
                .with_redelivered(delivery.redelivered);
                Ok(Wait::Delivery(envelope))
            }
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Settle {
                tag,
                error: e.to_string(),
            })
    }

    async fn nack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let options = BasicNackOptions {
            multiple: false,
            requeue: false,
        };
        self.channel
            .basic_nack(tag, options)
            .await
            .map_err(|e| BrokerError::Settle {
                tag,
                error: e.to_string(),
            })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| self.closed(e))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel
            .close(REPLY_SUCCESS, "bye")
            .await
            .map_err(|e| self.closed(e))
    }
}

fn to_amqp(value: &serde_json::Value) -> AMQPValue {
    use serde_json::Value;
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AMQPValue::LongLongInt(i),
            None => AMQPValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        Value::Array(items) => {
            AMQPValue::FieldArray(FieldArray::from(items.iter().map(to_amqp).collect::<Vec<_>>()))
        }
        Value::Object(map) => {
            let mut table = FieldTable::default();
            for (k, v) in map {
                table.insert(ShortString::from(k.clone()), to_amqp(v));
            }
            AMQPValue::FieldTable(table)
        }
    }
}

fn from_amqp(value: &AMQPValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(i) => Value::from(*i),
        AMQPValue::ShortShortUInt(i) => Value::from(*i),
        AMQPValue::ShortInt(i) => Value::from(*i),
        AMQPValue::ShortUInt(i) => Value::from(*i),
        AMQPValue::LongInt(i) => Value::from(*i),
        AMQPValue::LongUInt(i) => Value::from(*i),
        AMQPValue::LongLongInt(i) => Value::from(*i),
        AMQPValue::Timestamp(t) => Value::from(*t),
        AMQPValue::Float(f) => Value::from(*f),
        AMQPValue::Double(f) => Value::from(*f),
        AMQPValue::ShortString(s) => Value::from(s.as_str()),
        AMQPValue::LongString(s) => Value::from(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::FieldArray(items) => {
            Value::Array(items.as_slice().iter().map(from_amqp).collect())
        }
        AMQPValue::FieldTable(table) => Value::Object(
            table
                .inner()
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), from_amqp(v)))
                .collect(),
        ),
        AMQPValue::ByteArray(bytes) => {
            Value::from(String::from_utf8_lossy(bytes.as_slice()).into_owned())
        }
        AMQPValue::DecimalValue(_) | AMQPValue::Void => Value::Null,
    }
}

fn to_field_table(map: &Headers) -> FieldTable {
    let mut table = FieldTable::default();
    for (k, v) in map {
        table.insert(ShortString::from(k.clone()), to_amqp(v));
    }
    table
}

fn from_field_table(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), from_amqp(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_acked_consumers_take_one_delivery_at_a_time() {
        assert_eq!(prefetch(&ConsumerOptions::default()), Some(1));
        let auto_ack = ConsumerOptions {
            no_ack: true,
            ..Default::default()
        };
        assert_eq!(prefetch(&auto_ack), None);
    }

    #[test]
    fn test_header_conversion_keeps_delay_and_nesting() {
        let mut headers = Headers::new();
        headers.insert("x-delay".into(), json!(5000));
        headers.insert("trace".into(), json!({"id": "abc", "hops": [1, 2]}));
        headers.insert("flag".into(), json!(true));

        let back = from_field_table(&to_field_table(&headers));
        assert_eq!(back, headers);
    }
}
