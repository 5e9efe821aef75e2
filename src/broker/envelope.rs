//! # Message envelopes.
//!
//! - [`MessageEnvelope`]: one inbound delivery, normalized from whatever the transport hands out.
//!   Immutable once built; owned by the dispatch call that received it.
//! - [`OutboundMessage`]: a prepared message ready to publish, always carrying a unique
//!   `message_id`.
//! - [`Payload`]: what callers hand to `send`/`ask` before preparation.
//!
//! ## Wire fields
//! ```text
//! body                 JSON-encoded UTF-8 (opaque bytes to the transport)
//! message_id           amqp_<32 hex>, stamped at preparation time
//! reply_to             reply queue name (request/reply only)
//! application_headers  e.g. x-delay (milliseconds) for delayed-message exchanges
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::error::BrokerError;

/// Opaque broker handle identifying one delivered message instance.
pub type DeliveryTag = u64;

/// `application_headers` table.
pub type Headers = BTreeMap<String, serde_json::Value>;

/// Header read by delayed-message exchanges.
pub const DELAY_HEADER: &str = "x-delay";

/// One inbound delivery.
///
/// Constructed by broker implementations via [`MessageEnvelope::new`] and the `with_*`
/// builders; read-only afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageEnvelope {
    body: Vec<u8>,
    routing_key: String,
    exchange: String,
    delivery_tag: DeliveryTag,
    consumer_tag: String,
    reply_to: Option<String>,
    message_id: Option<String>,
    headers: Headers,
    redelivered: bool,
}

impl MessageEnvelope {
    /// Creates an envelope with the mandatory fields.
    pub fn new(
        delivery_tag: DeliveryTag,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            body: body.into(),
            routing_key: routing_key.into(),
            exchange: exchange.into(),
            delivery_tag,
            consumer_tag: String::new(),
            reply_to: None,
            message_id: None,
            headers: Headers::new(),
            redelivered: false,
        }
    }

    /// Attaches the consumer tag the delivery arrived on.
    #[inline]
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = tag.into();
        self
    }

    /// Attaches the reply queue name.
    #[inline]
    pub fn with_reply_to(mut self, reply_to: Option<String>) -> Self {
        self.reply_to = reply_to;
        self
    }

    /// Attaches the sender's message id.
    #[inline]
    pub fn with_message_id(mut self, id: Option<String>) -> Self {
        self.message_id = id;
        self
    }

    /// Attaches application headers.
    #[inline]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Marks the delivery as a redelivery.
    #[inline]
    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Raw body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as UTF-8 (lossy), for logs.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Routing key the message was published with.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Exchange the message was published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Delivery tag for ack/nack.
    pub fn delivery_tag(&self) -> DeliveryTag {
        self.delivery_tag
    }

    /// Consumer tag the delivery arrived on.
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Reply queue, if the sender expects an answer.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Sender's message id.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Application headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Whether the broker delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }
}

/// Unprepared message content.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Sent verbatim.
    Text(String),
    /// Sent verbatim.
    Bytes(Vec<u8>),
    /// JSON-encoded before sending.
    Json(serde_json::Value),
}

impl Payload {
    /// Serializes any value into a JSON payload.
    ///
    /// # Errors
    /// [`BrokerError::Encode`] if the value cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, BrokerError> {
        serde_json::to_value(value)
            .map(Payload::Json)
            .map_err(|e| BrokerError::Encode {
                error: e.to_string(),
            })
    }

    fn is_empty(&self) -> bool {
        match self {
            Payload::Text(s) => s.is_empty(),
            Payload::Bytes(b) => b.is_empty(),
            Payload::Json(v) => match v {
                serde_json::Value::Null => true,
                serde_json::Value::Array(a) => a.is_empty(),
                serde_json::Value::Object(o) => o.is_empty(),
                serde_json::Value::String(s) => s.is_empty(),
                _ => false,
            },
        }
    }

    fn into_bytes(self) -> Result<Vec<u8>, BrokerError> {
        match self {
            Payload::Text(s) => Ok(s.into_bytes()),
            Payload::Bytes(b) => Ok(b),
            Payload::Json(v) => serde_json::to_vec(&v).map_err(|e| BrokerError::Encode {
                error: e.to_string(),
            }),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(b)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Payload::Json(v)
    }
}

/// A prepared message ready for `publish`.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    body: Vec<u8>,
    message_id: String,
    reply_to: Option<String>,
    headers: Headers,
}

impl OutboundMessage {
    /// Prepares a payload for sending: rejects empty content, JSON-encodes structured
    /// payloads and stamps a fresh `message_id`.
    ///
    /// # Errors
    /// [`BrokerError::EmptyMessage`] or [`BrokerError::Encode`].
    ///
    /// # Example
    /// ```
    /// use queuevisor::broker::OutboundMessage;
    /// use serde_json::json;
    ///
    /// let msg = OutboundMessage::prepare(json!({"id": 7})).unwrap();
    /// assert_eq!(msg.body(), br#"{"id":7}"#);
    /// assert!(msg.message_id().starts_with("amqp_"));
    /// assert!(OutboundMessage::prepare("").is_err());
    /// ```
    pub fn prepare(payload: impl Into<Payload>) -> Result<Self, BrokerError> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(BrokerError::EmptyMessage);
        }
        Ok(Self {
            body: payload.into_bytes()?,
            message_id: new_message_id(),
            reply_to: None,
            headers: Headers::new(),
        })
    }

    /// Sets the reply queue.
    #[inline]
    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    /// Adds one application header.
    #[inline]
    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Sets the `x-delay` header (milliseconds) used by delayed-message exchanges.
    #[inline]
    pub fn with_delay(self, delay: Duration) -> Self {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.with_header(DELAY_HEADER, serde_json::Value::from(ms))
    }

    /// Encoded body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as UTF-8 (lossy), for logs.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Unique message id.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Reply queue, if set.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Application headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Message properties as a JSON object (for the journal).
    pub fn properties(&self) -> serde_json::Value {
        let mut props = serde_json::Map::new();
        props.insert(
            "message_id".to_string(),
            serde_json::Value::from(self.message_id.clone()),
        );
        if let Some(reply_to) = &self.reply_to {
            props.insert(
                "reply_to".to_string(),
                serde_json::Value::from(reply_to.clone()),
            );
        }
        if !self.headers.is_empty() {
            let headers = self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<serde_json::Map<_, _>>();
            props.insert(
                "application_headers".to_string(),
                serde_json::Value::Object(headers),
            );
        }
        serde_json::Value::Object(props)
    }
}

fn new_message_id() -> String {
    format!("amqp_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prepare_rejects_empty_payloads() {
        assert_eq!(
            OutboundMessage::prepare(""),
            Err(BrokerError::EmptyMessage)
        );
        assert_eq!(
            OutboundMessage::prepare(json!({})),
            Err(BrokerError::EmptyMessage)
        );
        assert_eq!(
            OutboundMessage::prepare(Vec::new()),
            Err(BrokerError::EmptyMessage)
        );
        assert!(OutboundMessage::prepare(json!(0)).is_ok());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = OutboundMessage::prepare("quit").unwrap();
        let b = OutboundMessage::prepare("quit").unwrap();
        assert_ne!(a.message_id(), b.message_id());
        assert_eq!(a.body(), b"quit");
    }

    #[test]
    fn test_delay_header_in_millis() {
        let msg = OutboundMessage::prepare(json!({"a": 1}))
            .unwrap()
            .with_delay(Duration::from_secs(2));
        assert_eq!(msg.headers().get(DELAY_HEADER), Some(&json!(2000)));
        assert_eq!(msg.properties()["application_headers"]["x-delay"], json!(2000));
    }

    #[test]
    fn test_envelope_builders() {
        let env = MessageEnvelope::new(3, "market", "order.created", b"{}".to_vec())
            .with_consumer_tag("consumer")
            .with_reply_to(Some("amq.gen-1".into()));
        assert_eq!(env.delivery_tag(), 3);
        assert_eq!(env.reply_to(), Some("amq.gen-1"));
        assert_eq!(env.consumer_tag(), "consumer");
        assert!(!env.redelivered());
    }
}
