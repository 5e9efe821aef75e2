//! # In-process reference broker.
//!
//! [`MemoryBroker`] implements the broker semantics the runtime relies on, without a
//! network: exchanges (topic / direct / fanout / headers), queues, bindings, consumers,
//! per-channel delivery tags, ack / nack / cancel, and redelivery of unacknowledged
//! messages when a channel or connection closes.
//!
//! Every operation is appended to an operation log ([`BrokerOp`]) so callers can assert
//! exactly which settlements were issued.
//!
//! ## Architecture
//! ```text
//! MemoryBroker (shared state + Notify)
//!   ├── connect() ─► MemoryConnection ── channel() ─► MemoryChannel
//!   │                      │                            ├─ publish ─► route ─► queue(s) ─► notify
//!   │                      └─ close() ─► close every     └─ wait ─► pop for own consumers
//!   │                                    own channel
//!   └── ops() / acks() / nacks() / queue_len()   (inspection)
//! ```
//!
//! ## Simplifications
//! - headers exchanges route to every binding (no `x-match` evaluation);
//! - nacked messages are dropped (no dead-letter exchange);
//! - publishing to an undeclared exchange is an error instead of a channel close.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    BrokerChannel, BrokerClient, ChannelRef, DeliveryTag, MessageEnvelope, OutboundMessage, Wait,
};
use crate::config::{Arguments, ConsumerOptions, ExchangeConfig, ExchangeKind, QueueOptions};
use crate::error::BrokerError;

/// One recorded broker operation.
#[derive(Clone, Debug, PartialEq)]
pub enum BrokerOp {
    /// Exchange declared.
    DeclareExchange {
        /// Exchange name.
        name: String,
        /// Exchange type.
        kind: ExchangeKind,
    },
    /// Queue declared.
    DeclareQueue {
        /// Effective queue name.
        name: String,
    },
    /// Queue bound.
    Bind {
        /// Queue name.
        queue: String,
        /// Exchange name.
        exchange: String,
        /// Binding key.
        routing_key: String,
    },
    /// Message published.
    Publish {
        /// Exchange name.
        exchange: String,
        /// Routing key.
        routing_key: String,
        /// The message.
        message: OutboundMessage,
    },
    /// Consumer started.
    Consume {
        /// Queue name.
        queue: String,
        /// Consumer tag.
        consumer_tag: String,
    },
    /// Delivery acknowledged.
    Ack {
        /// Channel id.
        channel: u64,
        /// Delivery tag.
        tag: DeliveryTag,
    },
    /// Delivery rejected.
    Nack {
        /// Channel id.
        channel: u64,
        /// Delivery tag.
        tag: DeliveryTag,
    },
    /// Consumer cancelled.
    Cancel {
        /// Consumer tag.
        consumer_tag: String,
    },
    /// Channel closed.
    CloseChannel {
        /// Channel id.
        channel: u64,
    },
    /// Connection closed.
    CloseConnection {
        /// Connection id.
        connection: u64,
    },
}

#[derive(Clone, Debug)]
struct Stored {
    exchange: String,
    routing_key: String,
    message: OutboundMessage,
    redelivered: bool,
}

#[derive(Debug)]
struct Binding {
    queue: String,
    exchange: String,
    routing_key: String,
}

#[derive(Debug)]
struct ConsumerRec {
    queue: String,
    channel: u64,
    no_ack: bool,
}

#[derive(Debug)]
struct ChannelState {
    connection: u64,
    open: bool,
    next_tag: DeliveryTag,
    unacked: HashMap<DeliveryTag, (String, Stored)>,
}

#[derive(Debug, Default)]
struct State {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, VecDeque<Stored>>,
    bindings: Vec<Binding>,
    consumers: HashMap<String, ConsumerRec>,
    channels: HashMap<u64, ChannelState>,
    connections: HashMap<u64, bool>,
    next_id: u64,
    ops: Vec<BrokerOp>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_open(&self, channel: u64) -> Result<(), BrokerError> {
        let ch = self
            .channels
            .get(&channel)
            .ok_or(BrokerError::ChannelClosed)?;
        if !self.connections.get(&ch.connection).copied().unwrap_or(false) {
            return Err(BrokerError::ConnectionClosed);
        }
        if !ch.open {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, BrokerError> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| vec![routing_key.to_string()])
                .unwrap_or_default());
        }
        let kind = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                error: "no exchange".to_string(),
            })?;

        let mut targets: Vec<String> = Vec::new();
        for b in self.bindings.iter().filter(|b| b.exchange == exchange) {
            let hit = match kind {
                ExchangeKind::Direct => b.routing_key == routing_key,
                ExchangeKind::Topic => topic_matches(&b.routing_key, routing_key),
                ExchangeKind::Fanout | ExchangeKind::Headers => true,
            };
            if hit && !targets.contains(&b.queue) {
                targets.push(b.queue.clone());
            }
        }
        Ok(targets)
    }

    fn close_channel(&mut self, channel: u64) {
        let Some(ch) = self.channels.get_mut(&channel) else {
            return;
        };
        if !ch.open {
            return;
        }
        ch.open = false;
        let mut unacked: Vec<(DeliveryTag, (String, Stored))> = ch.unacked.drain().collect();
        unacked.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
        for (_, (queue, mut stored)) in unacked {
            stored.redelivered = true;
            if let Some(q) = self.queues.get_mut(&queue) {
                q.push_front(stored);
            }
        }
        self.consumers.retain(|_, c| c.channel != channel);
        self.ops.push(BrokerOp::CloseChannel { channel });
    }

    fn take_delivery(&mut self, channel: u64) -> Option<Wait> {
        let mut tags: Vec<&String> = self
            .consumers
            .iter()
            .filter(|(_, c)| c.channel == channel)
            .map(|(tag, _)| tag)
            .collect();
        if tags.is_empty() {
            return Some(Wait::Drained);
        }
        tags.sort();
        let picked = tags.into_iter().find_map(|tag| {
            let rec = self.consumers.get(tag)?;
            let queue = self.queues.get(&rec.queue)?;
            (!queue.is_empty()).then(|| (tag.clone(), rec.queue.clone(), rec.no_ack))
        })?;
        let (consumer_tag, queue, no_ack) = picked;
        let stored = self.queues.get_mut(&queue)?.pop_front()?;
        let ch = self.channels.get_mut(&channel)?;
        ch.next_tag += 1;
        let tag = ch.next_tag;

        let message = &stored.message;
        let envelope = MessageEnvelope::new(
            tag,
            stored.exchange.clone(),
            stored.routing_key.clone(),
            message.body().to_vec(),
        )
        .with_consumer_tag(consumer_tag)
        .with_reply_to(message.reply_to().map(str::to_string))
        .with_message_id(Some(message.message_id().to_string()))
        .with_headers(message.headers().clone())
        .with_redelivered(stored.redelivered);

        if !no_ack {
            ch.unacked.insert(tag, (queue, stored));
        }
        Some(Wait::Delivery(envelope))
    }
}

/// Topic match: `*` matches exactly one word, `#` zero or more words.
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn go(p: &[&str], k: &[&str]) -> bool {
        match (p.split_first(), k.split_first()) {
            (None, None) => true,
            (Some((&"#", rest)), _) => {
                go(rest, k) || k.split_first().is_some_and(|(_, krest)| go(p, krest))
            }
            (Some((pw, prest)), Some((kw, krest))) => (*pw == "*" || pw == kw) && go(prest, krest),
            _ => false,
        }
    }
    let p: Vec<&str> = pattern.split('.').collect();
    let k: Vec<&str> = key.split('.').collect();
    go(&p, &k)
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// In-process broker shared by any number of connections.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a new connection.
    pub fn connect(&self) -> MemoryConnection {
        let id = {
            let mut st = self.lock();
            let id = st.next_id();
            st.connections.insert(id, true);
            id
        };
        MemoryConnection {
            broker: self.clone(),
            id,
        }
    }

    /// Snapshot of the operation log.
    pub fn ops(&self) -> Vec<BrokerOp> {
        self.lock().ops.clone()
    }

    /// Delivery tags acknowledged so far.
    pub fn acks(&self) -> Vec<DeliveryTag> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                BrokerOp::Ack { tag, .. } => Some(*tag),
                _ => None,
            })
            .collect()
    }

    /// Delivery tags rejected so far.
    pub fn nacks(&self) -> Vec<DeliveryTag> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                BrokerOp::Nack { tag, .. } => Some(*tag),
                _ => None,
            })
            .collect()
    }

    /// Consumer tags cancelled so far.
    pub fn cancels(&self) -> Vec<String> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                BrokerOp::Cancel { consumer_tag } => Some(consumer_tag.clone()),
                _ => None,
            })
            .collect()
    }

    /// Messages published so far as `(exchange, routing_key, message)`.
    pub fn published(&self) -> Vec<(String, String, OutboundMessage)> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                BrokerOp::Publish {
                    exchange,
                    routing_key,
                    message,
                } => Some((exchange.clone(), routing_key.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    /// Ready (not yet delivered) messages in `queue`.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Whether a queue with this name exists.
    pub fn has_queue(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    /// Delivered but unsettled messages across all channels.
    pub fn unacked_len(&self) -> usize {
        self.lock()
            .channels
            .values()
            .map(|ch| ch.unacked.len())
            .sum()
    }

    /// Number of active consumers.
    pub fn consumer_count(&self) -> usize {
        self.lock().consumers.len()
    }

    fn wake(&self) {
        self.shared.notify.notify_waiters();
    }
}

/// One connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
}

impl MemoryConnection {
    /// Connection id (as recorded in [`BrokerOp::CloseConnection`]).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the connection is still open.
    pub fn is_open(&self) -> bool {
        self.broker
            .lock()
            .connections
            .get(&self.id)
            .copied()
            .unwrap_or(false)
    }
}

#[async_trait]
impl BrokerClient for MemoryConnection {
    async fn channel(&self) -> Result<ChannelRef, BrokerError> {
        let id = {
            let mut st = self.broker.lock();
            if !st.connections.get(&self.id).copied().unwrap_or(false) {
                return Err(BrokerError::ConnectionClosed);
            }
            let id = st.next_id();
            st.channels.insert(
                id,
                ChannelState {
                    connection: self.id,
                    open: true,
                    next_tag: 0,
                    unacked: HashMap::new(),
                },
            );
            id
        };
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            id,
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        {
            let mut st = self.broker.lock();
            if !st.connections.get(&self.id).copied().unwrap_or(false) {
                return Ok(());
            }
            let mut ids: Vec<u64> = st
                .channels
                .iter()
                .filter(|(_, ch)| ch.connection == self.id)
                .map(|(id, _)| *id)
                .collect();
            ids.sort_unstable();
            for id in ids {
                st.close_channel(id);
            }
            st.connections.insert(self.id, false);
            st.ops.push(BrokerOp::CloseConnection {
                connection: self.id,
            });
        }
        self.broker.wake();
        Ok(())
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    id: u64,
}

impl MemoryChannel {
    fn try_take(&self) -> Result<Option<Wait>, BrokerError> {
        let mut st = self.broker.lock();
        st.check_open(self.id)?;
        Ok(st.take_delivery(self.id))
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        cfg: &ExchangeConfig,
    ) -> Result<(), BrokerError> {
        let mut st = self.broker.lock();
        st.check_open(self.id)?;
        match st.exchanges.get(name) {
            None if cfg.passive => {
                return Err(BrokerError::Declare {
                    name: name.to_string(),
                    error: "no exchange".to_string(),
                });
            }
            Some(existing) if *existing != kind => {
                return Err(BrokerError::Declare {
                    name: name.to_string(),
                    error: format!("inequivalent type: {existing} vs {kind}"),
                });
            }
            _ => {}
        }
        st.exchanges.insert(name.to_string(), kind);
        st.ops.push(BrokerOp::DeclareExchange {
            name: name.to_string(),
            kind,
        });
        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        options: &QueueOptions,
        _arguments: &Arguments,
    ) -> Result<String, BrokerError> {
        let mut st = self.broker.lock();
        st.check_open(self.id)?;
        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_string()
        };
        if options.passive && !st.queues.contains_key(&name) {
            return Err(BrokerError::Declare {
                name,
                error: "no queue".to_string(),
            });
        }
        st.queues.entry(name.clone()).or_default();
        st.ops.push(BrokerOp::DeclareQueue { name: name.clone() });
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let mut st = self.broker.lock();
        st.check_open(self.id)?;
        if !st.queues.contains_key(queue) {
            return Err(BrokerError::Declare {
                name: queue.to_string(),
                error: "no queue".to_string(),
            });
        }
        if !st.exchanges.contains_key(exchange) {
            return Err(BrokerError::Declare {
                name: exchange.to_string(),
                error: "no exchange".to_string(),
            });
        }
        let exists = st.bindings.iter().any(|b| {
            b.queue == queue && b.exchange == exchange && b.routing_key == routing_key
        });
        if !exists {
            st.bindings.push(Binding {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        st.ops.push(BrokerOp::Bind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &OutboundMessage,
    ) -> Result<(), BrokerError> {
        {
            let mut st = self.broker.lock();
            st.check_open(self.id)?;
            let targets = st.route(exchange, routing_key)?;
            for queue in targets {
                if let Some(q) = st.queues.get_mut(&queue) {
                    q.push_back(Stored {
                        exchange: exchange.to_string(),
                        routing_key: routing_key.to_string(),
                        message: message.clone(),
                        redelivered: false,
                    });
                }
            }
            st.ops.push(BrokerOp::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                message: message.clone(),
            });
        }
        self.broker.wake();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: &ConsumerOptions,
    ) -> Result<String, BrokerError> {
        let tag = {
            let mut st = self.broker.lock();
            st.check_open(self.id)?;
            if !st.queues.contains_key(queue) {
                return Err(BrokerError::Consume {
                    queue: queue.to_string(),
                    error: "no queue".to_string(),
                });
            }
            let tag = if consumer_tag.is_empty() {
                format!("amq.ctag-{}", Uuid::new_v4().simple())
            } else {
                consumer_tag.to_string()
            };
            if st.consumers.contains_key(&tag) {
                return Err(BrokerError::Consume {
                    queue: queue.to_string(),
                    error: format!("consumer tag {tag:?} in use"),
                });
            }
            st.consumers.insert(
                tag.clone(),
                ConsumerRec {
                    queue: queue.to_string(),
                    channel: self.id,
                    no_ack: options.no_ack,
                },
            );
            st.ops.push(BrokerOp::Consume {
                queue: queue.to_string(),
                consumer_tag: tag.clone(),
            });
            tag
        };
        self.broker.wake();
        Ok(tag)
    }

    async fn wait(&self, timeout: Option<Duration>) -> Result<Wait, BrokerError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.broker.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.try_take()? {
                return Ok(outcome);
            }
            match deadline {
                Some(at) => {
                    if tokio::time::timeout_at(at, notified).await.is_err() {
                        return Ok(Wait::Idle);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.settle(tag, true)
    }

    async fn nack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.settle(tag, false)
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        {
            let mut st = self.broker.lock();
            st.check_open(self.id)?;
            st.consumers.remove(consumer_tag);
            st.ops.push(BrokerOp::Cancel {
                consumer_tag: consumer_tag.to_string(),
            });
        }
        self.broker.wake();
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.lock().close_channel(self.id);
        self.broker.wake();
        Ok(())
    }
}

impl MemoryChannel {
    fn settle(&self, tag: DeliveryTag, ack: bool) -> Result<(), BrokerError> {
        let mut st = self.broker.lock();
        st.check_open(self.id)?;
        let known = st
            .channels
            .get_mut(&self.id)
            .and_then(|ch| ch.unacked.remove(&tag))
            .is_some();
        if !known {
            return Err(BrokerError::Settle {
                tag,
                error: "unknown delivery tag".to_string(),
            });
        }
        st.ops.push(if ack {
            BrokerOp::Ack {
                channel: self.id,
                tag,
            }
        } else {
            BrokerOp::Nack {
                channel: self.id,
                tag,
            }
        });
        Ok(())
    }
}
