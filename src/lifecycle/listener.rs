//! # Worker root object.
//!
//! A [`Listener`] owns one broker connection for one queue and runs the consume loop.
//!
//! ```text
//! run()
//!  ├─ channel(), declare queue, declare + bind every exchange, consume   → RUNNING
//!  └─ loop (single suspension point)
//!       select! (biased)
//!         ├─ hard token ─────────► close connection ──────────────► STOPPING_HARD → STOPPED
//!         ├─ SoftStop ───────────► cancel consumer ───────────────► STOPPING_SOFT
//!         ├─ Restart ────────────► close channel, open, consume ──► RESTARTING → RUNNING
//!         ├─ Probe(d) ───────────► spawn delayed health report
//!         └─ wait()
//!              ├─ Delivery ──► dispatch (raced only against the hard token)
//!              ├─ Idle ──────► loop
//!              ├─ Drained ───► STOPPED (soft stop / quit sentinel / broker cancel)
//!              └─ Err ───────► STOPPED, transport fault
//! ```
//!
//! ## Rules
//! - Deliveries are handled strictly one at a time.
//! - Cooperative controls are read only between deliveries.
//! - A hard stop abandons the in-flight delivery unsettled; the broker redelivers it.
//! - After a soft stop or drain the channel and connection are closed cleanly.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerChannel, ChannelRef, ClientRef, Wait};
use crate::config::{ExchangeConfig, ExchangeKind, QueueConfig};
use crate::dispatch::{Dispatcher, Settlement};
use crate::error::{BrokerError, ListenerError};
use crate::events::{Bus, Event, EventKind};
use crate::lifecycle::control::{ControlHandle, ControlInbox, ControlSignal};
use crate::lifecycle::probe::HealthReport;
use crate::lifecycle::state::{ConsumerState, Lifecycle};

/// How a consume loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerExit {
    /// Soft stop (signal or quit sentinel) completed.
    SoftStopped,
    /// Hard stop closed the connection.
    HardStopped,
    /// The broker cancelled the consumer.
    Drained,
}

impl ConsumerExit {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConsumerExit::SoftStopped | ConsumerExit::Drained => 0,
            ConsumerExit::HardStopped => 143,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Bind {
    pub(crate) routing_key: String,
    pub(crate) exchange: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) config: ExchangeConfig,
}

#[derive(Clone, Debug)]
pub(crate) struct Topology {
    pub(crate) queue: String,
    pub(crate) config: QueueConfig,
    pub(crate) binds: Vec<Bind>,
}

impl Topology {
    /// Declares queue, exchanges and bindings, then starts consuming.
    async fn subscribe(
        &self,
        channel: &dyn BrokerChannel,
        consumer_tag: &str,
    ) -> Result<String, BrokerError> {
        let queue = channel
            .declare_queue(&self.queue, &self.config.options, &self.config.arguments)
            .await?;
        for bind in &self.binds {
            channel
                .declare_exchange(&bind.exchange, bind.kind, &bind.config)
                .await?;
            channel
                .bind_queue(&queue, &bind.exchange, &bind.routing_key)
                .await?;
        }
        channel
            .consume(&queue, consumer_tag, &self.config.consumer_options)
            .await
    }
}

/// One worker: one connection, one queue.
pub struct Listener {
    pub(crate) client: ClientRef,
    pub(crate) consumer_tag: String,
    pub(crate) topology: Topology,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) bus: Bus,
    pub(crate) control: ControlHandle,
    pub(crate) inbox: ControlInbox,
}

struct Worker {
    client: ClientRef,
    queue: Arc<str>,
    bus: Bus,
    lifecycle: Lifecycle,
    state_tx: watch::Sender<ConsumerState>,
}

impl Worker {
    fn set(&mut self, to: ConsumerState) -> bool {
        if !self.lifecycle.advance(to) {
            return false;
        }
        info!(queue = %self.queue, state = to.as_label(), "consumer state");
        self.state_tx.send_replace(to);
        self.bus.publish(
            Event::new(EventKind::StateChanged)
                .with_queue(Arc::clone(&self.queue))
                .with_state(to.as_label()),
        );
        true
    }

    async fn hard_stop(&mut self) -> ConsumerExit {
        if let Err(e) = self.client.close().await {
            warn!(queue = %self.queue, error = %e, "closing connection on hard stop failed");
        }
        self.set(ConsumerState::Stopped);
        ConsumerExit::HardStopped
    }

    async fn fault(&mut self, e: BrokerError) -> ListenerError {
        error!(queue = %self.queue, label = e.as_label(), error = %e, "transport fault, consume loop terminated");
        if let Err(close) = self.client.close().await {
            debug!(error = %close, "closing connection after fault failed");
        }
        self.set(ConsumerState::Stopped);
        ListenerError::Broker(e)
    }

    fn probe(&self, after: std::time::Duration) {
        let bus = self.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            match HealthReport::sample() {
                Some(report) => {
                    info!(
                        pid = report.pid,
                        memory_bytes = report.memory_bytes,
                        virtual_memory_bytes = report.virtual_memory_bytes,
                        "health probe"
                    );
                    bus.publish(report.to_event());
                }
                None => warn!("health probe: process not visible"),
            }
        });
    }
}

enum Step {
    Hard,
    Control(ControlSignal),
    Waited(Result<Wait, BrokerError>),
}

impl Listener {
    /// Handle for stopping, restarting or probing this worker.
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Event bus of this worker.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Queue consumed by this worker.
    pub fn queue(&self) -> &str {
        &self.topology.queue
    }

    /// Runs the consume loop until it stops.
    ///
    /// # Errors
    /// [`ListenerError::Broker`] on transport faults (including failing to set up).
    pub async fn run(self) -> Result<ConsumerExit, ListenerError> {
        let Listener {
            client,
            consumer_tag,
            topology,
            dispatcher,
            bus,
            control: _control,
            inbox,
        } = self;
        let ControlInbox {
            rx: mut controls,
            hard,
            state: state_tx,
        } = inbox;

        let mut worker = Worker {
            client: Arc::clone(&client),
            queue: Arc::from(topology.queue.as_str()),
            bus,
            lifecycle: Lifecycle::new(),
            state_tx,
        };

        let (mut channel, mut tag) = match open(&client, &topology, &consumer_tag).await {
            Ok(opened) => opened,
            Err(e) => return Err(worker.fault(e).await),
        };
        info!(queue = %worker.queue, consumer_tag = %tag, "consuming");
        let mut hard_ignored = false;

        let exit = loop {
            let step = tokio::select! {
                biased;
                _ = hard.cancelled(), if !hard_ignored => Step::Hard,
                Some(sig) = controls.recv() => Step::Control(sig),
                waited = channel.wait(None) => Step::Waited(waited),
            };

            match step {
                Step::Hard => {
                    if worker.set(ConsumerState::StoppingHard) {
                        break worker.hard_stop().await;
                    }
                    hard_ignored = true;
                    debug!(queue = %worker.queue, "hard stop ignored, terminal action already taken");
                }
                Step::Control(ControlSignal::SoftStop) => {
                    if worker.set(ConsumerState::StoppingSoft) {
                        if let Err(e) = channel.cancel(&tag).await {
                            return Err(worker.fault(e).await);
                        }
                    }
                }
                Step::Control(ControlSignal::Restart) => {
                    if !worker.set(ConsumerState::Restarting) {
                        continue;
                    }
                    if let Err(e) = channel.close().await {
                        debug!(error = %e, "closing channel on restart failed");
                    }
                    match open(&client, &topology, &consumer_tag).await {
                        Ok((c, t)) => {
                            channel = c;
                            tag = t;
                        }
                        Err(e) => return Err(worker.fault(e).await),
                    }
                    worker.set(ConsumerState::Running);
                }
                Step::Control(ControlSignal::Probe(after)) => worker.probe(after),
                Step::Waited(Ok(Wait::Delivery(envelope))) => {
                    let settled = tokio::select! {
                        biased;
                        _ = hard.cancelled(), if !hard_ignored => None,
                        settled = dispatcher.dispatch(channel.as_ref(), envelope) => Some(settled),
                    };
                    match settled {
                        None => {
                            if worker.set(ConsumerState::StoppingHard) {
                                warn!(queue = %worker.queue, "hard stop abandoned in-flight delivery");
                                break worker.hard_stop().await;
                            }
                            hard_ignored = true;
                        }
                        Some(Ok(Settlement::Cancelled)) => {
                            worker.set(ConsumerState::StoppingSoft);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(worker.fault(e).await),
                    }
                }
                Step::Waited(Ok(Wait::Idle)) => {}
                Step::Waited(Ok(Wait::Drained)) => {
                    let exit = if worker.lifecycle.state() == ConsumerState::StoppingSoft {
                        ConsumerExit::SoftStopped
                    } else {
                        ConsumerExit::Drained
                    };
                    worker.set(ConsumerState::Stopped);
                    break exit;
                }
                Step::Waited(Err(e)) => return Err(worker.fault(e).await),
            }
        };

        if exit != ConsumerExit::HardStopped {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "closing channel failed");
            }
            if let Err(e) = client.close().await {
                debug!(error = %e, "closing connection failed");
            }
        }
        info!(queue = %worker.queue, ?exit, "consume loop finished");
        Ok(exit)
    }
}

async fn open(
    client: &ClientRef,
    topology: &Topology,
    consumer_tag: &str,
) -> Result<(ChannelRef, String), BrokerError> {
    let channel = client.channel().await?;
    let tag = topology.subscribe(channel.as_ref(), consumer_tag).await?;
    Ok((channel, tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::{Notify, mpsc};

    use crate::broker::{
        BrokerClient, BrokerOp, DeliveryTag, MemoryBroker, MemoryConnection, OutboundMessage,
    };
    use crate::config::{Arguments, Config, ConsumerOptions, QueueOptions};
    use crate::error::HandlerError;
    use crate::handlers::{DeliveryInfo, HandlerFn, HandlerRegistry};
    use crate::lifecycle::ListenerBuilder;

    const CONFIG: &str = r#"
        [broker]
        user = "guest"

        [exchanges.market]
        type = "topic"

        [queues.orders.binds]
        "order.*" = "market"
    "#;

    fn config() -> Arc<Config> {
        Arc::new(Config::from_toml(CONFIG).unwrap())
    }

    fn echo_registry() -> HandlerRegistry {
        let mut reg = HandlerRegistry::new();
        reg.on(
            "order.created",
            HandlerFn::arc("created", |_b: Value, _i: DeliveryInfo| async {
                Ok::<_, HandlerError>(true)
            }),
        );
        reg
    }

    async fn publish(broker: &MemoryBroker, routing_key: &str, body: &str) {
        let conn = broker.connect();
        let ch = conn.channel().await.unwrap();
        ch.declare_exchange("market", ExchangeKind::Topic, &ExchangeConfig::default())
            .await
            .unwrap();
        ch.publish("market", routing_key, &OutboundMessage::prepare(body).unwrap())
            .await
            .unwrap();
    }

    async fn declare(broker: &MemoryBroker) {
        let conn = broker.connect();
        let ch = conn.channel().await.unwrap();
        ch.declare_exchange("market", ExchangeKind::Topic, &ExchangeConfig::default())
            .await
            .unwrap();
        ch.declare_queue("orders", &Default::default(), &Default::default())
            .await
            .unwrap();
        ch.bind_queue("orders", "market", "order.*").await.unwrap();
    }

    fn listener(broker: &MemoryBroker, registry: HandlerRegistry) -> (Arc<MemoryConnection>, Listener) {
        let conn = Arc::new(broker.connect());
        let l = ListenerBuilder::new(config(), "orders")
            .with_registry(registry)
            .build(conn.clone())
            .unwrap();
        (conn, l)
    }

    fn states(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::StateChanged {
                out.extend(ev.state);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_quit_sentinel_drains_after_earlier_deliveries() {
        let broker = MemoryBroker::new();
        declare(&broker).await;
        publish(&broker, "order.created", r#"{"id":1}"#).await;
        publish(&broker, "order.created", r#"{"id":2}"#).await;
        publish(&broker, "order.created", "quit").await;

        let (conn, l) = listener(&broker, echo_registry());
        let mut events = l.bus().subscribe();
        let exit = l.run().await.unwrap();

        assert_eq!(exit, ConsumerExit::SoftStopped);
        assert_eq!(broker.acks().len(), 2);
        assert!(broker.nacks().is_empty());
        assert_eq!(states(&mut events), vec!["stopping_soft", "stopped"]);
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_topology_is_declared_before_consuming() {
        let broker = MemoryBroker::new();
        let (_conn, l) = listener(&broker, echo_registry());
        let control = l.control();
        control.soft_stop();
        assert_eq!(l.run().await.unwrap(), ConsumerExit::SoftStopped);

        let ops = broker.ops();
        let pos = |f: &dyn Fn(&BrokerOp) -> bool| ops.iter().position(|op| f(op)).unwrap();
        let queue = pos(&|op| matches!(op, BrokerOp::DeclareQueue { name } if name == "orders"));
        let exchange = pos(&|op| matches!(op, BrokerOp::DeclareExchange { name, .. } if name == "market"));
        let bind = pos(&|op| matches!(op, BrokerOp::Bind { routing_key, .. } if routing_key == "order.*"));
        let consume = pos(&|op| matches!(op, BrokerOp::Consume { consumer_tag, .. } if consumer_tag == "consumer"));
        assert!(queue < exchange && exchange < bind && bind < consume);
        assert_eq!(control.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn test_soft_stop_lets_in_flight_delivery_finish() {
        let broker = MemoryBroker::new();
        declare(&broker).await;
        publish(&broker, "order.created", "{}").await;

        let (started_tx, mut started_rx) = mpsc::unbounded_channel::<()>();
        let release = Arc::new(Notify::new());
        let gate = release.clone();
        let mut reg = HandlerRegistry::new();
        reg.on(
            "order.created",
            HandlerFn::arc("slow", move |_b: Value, _i: DeliveryInfo| {
                let started = started_tx.clone();
                let gate = gate.clone();
                async move {
                    let _ = started.send(());
                    gate.notified().await;
                    Ok::<_, HandlerError>(true)
                }
            }),
        );

        let (_conn, l) = listener(&broker, reg);
        let control = l.control();
        let run = tokio::spawn(l.run());

        started_rx.recv().await.unwrap();
        control.soft_stop();
        release.notify_one();

        assert_eq!(run.await.unwrap().unwrap(), ConsumerExit::SoftStopped);
        assert_eq!(broker.acks().len(), 1);
        assert!(broker.cancels().contains(&"consumer".to_string()));
    }

    #[tokio::test]
    async fn test_hard_stop_abandons_in_flight_delivery() {
        let broker = MemoryBroker::new();
        declare(&broker).await;
        publish(&broker, "order.created", "{}").await;

        let (started_tx, mut started_rx) = mpsc::unbounded_channel::<()>();
        let mut reg = HandlerRegistry::new();
        reg.on(
            "order.created",
            HandlerFn::arc("stuck", move |_b: Value, _i: DeliveryInfo| {
                let started = started_tx.clone();
                async move {
                    let _ = started.send(());
                    std::future::pending::<()>().await;
                    Ok::<_, HandlerError>(true)
                }
            }),
        );

        let (conn, l) = listener(&broker, reg);
        let mut events = l.bus().subscribe();
        let control = l.control();
        let run = tokio::spawn(l.run());

        started_rx.recv().await.unwrap();
        control.hard_stop();

        assert_eq!(run.await.unwrap().unwrap(), ConsumerExit::HardStopped);
        assert!(broker.acks().is_empty());
        assert!(broker.nacks().is_empty());
        assert!(!conn.is_open());
        assert_eq!(broker.queue_len("orders"), 1);
        assert_eq!(states(&mut events), vec!["stopping_hard", "stopped"]);
        assert_eq!(ConsumerExit::HardStopped.exit_code(), 143);
    }

    #[tokio::test]
    async fn test_restart_replaces_channel_and_keeps_consuming() {
        let broker = MemoryBroker::new();
        declare(&broker).await;

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
        let mut reg = HandlerRegistry::new();
        reg.on(
            "order.created",
            HandlerFn::arc("created", move |_b: Value, _i: DeliveryInfo| {
                let done = done_tx.clone();
                async move {
                    let _ = done.send(());
                    Ok::<_, HandlerError>(true)
                }
            }),
        );

        let (_conn, l) = listener(&broker, reg);
        let control = l.control();
        let run = tokio::spawn(l.run());

        publish(&broker, "order.created", "{}").await;
        done_rx.recv().await.unwrap();
        control.restart();
        publish(&broker, "order.created", "{}").await;
        done_rx.recv().await.unwrap();
        publish(&broker, "order.created", "quit").await;

        assert_eq!(run.await.unwrap().unwrap(), ConsumerExit::SoftStopped);
        assert_eq!(broker.acks().len(), 2);
        let ops = broker.ops();
        let consumes = ops
            .iter()
            .filter(|op| matches!(op, BrokerOp::Consume { .. }))
            .count();
        assert_eq!(consumes, 2);
        assert!(ops.iter().any(|op| matches!(op, BrokerOp::CloseChannel { .. })));
    }

    #[tokio::test]
    async fn test_connection_loss_is_a_transport_fault() {
        let broker = MemoryBroker::new();
        let (conn, l) = listener(&broker, echo_registry());
        let control = l.control();
        let run = tokio::spawn(l.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close().await.unwrap();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, ListenerError::Broker(ref e) if e.is_closed()));
        assert_eq!(control.state(), ConsumerState::Stopped);
    }

    #[test]
    fn test_unknown_queue_fails_before_connecting() {
        let broker = MemoryBroker::new();
        let err = ListenerBuilder::new(config(), "missing")
            .with_registry(echo_registry())
            .build(Arc::new(broker.connect()))
            .err()
            .unwrap();
        assert_eq!(err.as_label(), "config_unknown_queue");
        assert!(broker.ops().is_empty());
    }

    #[tokio::test]
    async fn test_health_report_leaves_state_unchanged() {
        let broker = MemoryBroker::new();
        let (_conn, l) = listener(&broker, echo_registry());
        let mut events = l.bus().subscribe();
        let control = l.control();
        let run = tokio::spawn(l.run());

        control.probe(Duration::from_millis(10));
        let probe = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ev = events.recv().await.unwrap();
                if ev.kind == EventKind::HealthProbe {
                    break ev;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(probe.pid, Some(std::process::id()));
        assert!(probe.memory_bytes.is_some());
        assert_eq!(control.state(), ConsumerState::Running);

        control.soft_stop();
        assert_eq!(run.await.unwrap().unwrap(), ConsumerExit::SoftStopped);
        assert_eq!(states(&mut events), vec!["stopping_soft", "stopped"]);
    }

    /// Connection whose channels hold `wait` after a cancel until `gate` is notified,
    /// keeping the loop in `STOPPING_SOFT`.
    struct HoldingConnection {
        inner: MemoryConnection,
        gate: Arc<Notify>,
    }

    struct HoldingChannel {
        inner: ChannelRef,
        gate: Arc<Notify>,
        cancelled: AtomicBool,
    }

    #[async_trait]
    impl BrokerClient for HoldingConnection {
        async fn channel(&self) -> Result<ChannelRef, BrokerError> {
            Ok(Arc::new(HoldingChannel {
                inner: self.inner.channel().await?,
                gate: Arc::clone(&self.gate),
                cancelled: AtomicBool::new(false),
            }))
        }

        async fn close(&self) -> Result<(), BrokerError> {
            self.inner.close().await
        }
    }

    #[async_trait]
    impl BrokerChannel for HoldingChannel {
        async fn declare_exchange(
            &self,
            name: &str,
            kind: ExchangeKind,
            cfg: &ExchangeConfig,
        ) -> Result<(), BrokerError> {
            self.inner.declare_exchange(name, kind, cfg).await
        }

        async fn declare_queue(
            &self,
            name: &str,
            options: &QueueOptions,
            arguments: &Arguments,
        ) -> Result<String, BrokerError> {
            self.inner.declare_queue(name, options, arguments).await
        }

        async fn bind_queue(
            &self,
            queue: &str,
            exchange: &str,
            routing_key: &str,
        ) -> Result<(), BrokerError> {
            self.inner.bind_queue(queue, exchange, routing_key).await
        }

        async fn publish(
            &self,
            exchange: &str,
            routing_key: &str,
            message: &OutboundMessage,
        ) -> Result<(), BrokerError> {
            self.inner.publish(exchange, routing_key, message).await
        }

        async fn consume(
            &self,
            queue: &str,
            consumer_tag: &str,
            options: &ConsumerOptions,
        ) -> Result<String, BrokerError> {
            self.inner.consume(queue, consumer_tag, options).await
        }

        async fn wait(&self, timeout: Option<Duration>) -> Result<Wait, BrokerError> {
            if self.cancelled.load(Ordering::SeqCst) {
                self.gate.notified().await;
            }
            self.inner.wait(timeout).await
        }

        async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
            self.inner.ack(tag).await
        }

        async fn nack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
            self.inner.nack(tag).await
        }

        async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
            self.cancelled.store(true, Ordering::SeqCst);
            self.inner.cancel(consumer_tag).await
        }

        async fn close(&self) -> Result<(), BrokerError> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_hard_stop_after_soft_stop_is_ignored() {
        let broker = MemoryBroker::new();
        let gate = Arc::new(Notify::new());
        let conn = Arc::new(HoldingConnection {
            inner: broker.connect(),
            gate: Arc::clone(&gate),
        });
        let l = ListenerBuilder::new(config(), "orders")
            .with_registry(echo_registry())
            .build(conn.clone())
            .unwrap();
        let mut events = l.bus().subscribe();
        let control = l.control();
        let run = tokio::spawn(l.run());

        control.soft_stop();
        assert!(control.wait_for(ConsumerState::StoppingSoft).await);
        control.hard_stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(control.state(), ConsumerState::StoppingSoft);
        assert!(conn.inner.is_open());

        gate.notify_one();
        assert_eq!(run.await.unwrap().unwrap(), ConsumerExit::SoftStopped);
        assert_eq!(states(&mut events), vec!["stopping_soft", "stopped"]);
        assert!(!conn.inner.is_open());
    }
}
