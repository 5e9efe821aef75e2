//! # queuevisor
//!
//! **Queuevisor** turns a broker subscription into a supervised request worker.
//!
//! A worker consumes one queue, decodes each delivery, routes it by routing key to a
//! handler and settles it (ack on success, nack without requeue on any failure). OS
//! signals drive a small lifecycle state machine (graceful stop, hard stop, restart,
//! health probe). A separate supervisor process keeps a desired number of workers alive
//! per queue by inspecting the OS process table.
//!
//! ## Architecture
//! ```text
//!   OS signals ──► bridge_signals ──► ControlHandle
//!                                          │
//!                                          ▼
//!  ┌──────────────────────────── Listener (one per worker process) ───────────────────┐
//!  │ declare topology ─► consume(queue, tag) ─► loop { select! hard | control | wait } │
//!  │                                                        │                         │
//!  │                                                        ▼                         │
//!  │                     Dispatcher: decode ─► HandlerRegistry::resolve ─► handle     │
//!  │                                                        │                         │
//!  │                                          ack (true) / nack (false, error, panic) │
//!  └───────────────────────────────────────────────┬──────────────────────────────────┘
//!                                                  │ publishes
//!                                                  ▼
//!                              Bus (broadcast) ─► SubscriberSet ─┬─► LogWriter
//!                                                                └─► JournalWriter
//!
//!  Requester::ask ──► publish { reply_to } ──► wait on reply queue ──► body | Timeout
//!
//!  ProcessSupervisor (separate process):
//!      scan process table ─► count workers per queue ─► spawn missing | SIGTERM all
//! ```
//!
//! ## Lifecycle
//! ```text
//!            soft stop / quit                      consumer drained
//!  RUNNING ───────────────────► STOPPING_SOFT ───────────────────────► STOPPED
//!     │                                                                  ▲
//!     └──────────── hard stop ─────► STOPPING_HARD ──────────────────────┘
//! ```
//!
//! ## Modules
//! - [`config`]: TOML configuration and exchange/queue topology.
//! - [`broker`]: transport capabilities, message envelopes, in-memory and AMQP brokers.
//! - [`events`] / [`subscribers`]: runtime events and their observers.
//! - [`handlers`]: handler capability, interpreters, registry.
//! - [`dispatch`]: per-delivery decode, route, invoke, settle.
//! - [`reply`]: `send`, `send_delayed`, replies and `ask`.
//! - [`lifecycle`]: state machine, signals, the `Listener` worker.
//! - [`manage`]: process-count supervision.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use queuevisor::broker::{ClientRef, MemoryBroker};
//! use queuevisor::handlers::{DeliveryInfo, HandlerFn, HandlerRegistry};
//! use queuevisor::lifecycle::ListenerBuilder;
//! use queuevisor::{Config, HandlerError};
//! use serde_json::Value;
//!
//! let config = Config::from_toml(r#"
//!     [broker]
//!     user = "guest"
//!
//!     [exchanges.market]
//!
//!     [queues.orders.binds]
//!     "order.created" = "market"
//! "#).unwrap();
//!
//! let mut registry = HandlerRegistry::new();
//! registry.on("order.created", HandlerFn::arc("orders", |_body: Value, _info: DeliveryInfo| async {
//!     Ok::<_, HandlerError>(true)
//! }));
//!
//! let broker = MemoryBroker::new();
//! let client: ClientRef = Arc::new(broker.connect());
//! let listener = ListenerBuilder::new(Arc::new(config), "orders")
//!     .with_registry(registry)
//!     .build(client)
//!     .unwrap();
//! assert_eq!(listener.queue(), "orders");
//! ```

pub mod broker;
pub mod config;
pub mod dispatch;
mod error;
pub mod events;
pub mod handlers;
pub mod lifecycle;
pub mod manage;
pub mod reply;
pub mod subscribers;

// ---- Public re-exports ----

pub use config::Config;
pub use error::{
    AskError, BrokerError, ConfigError, DispatchError, HandlerError, ListenerError,
    SupervisionError,
};
pub use events::{Bus, Event, EventKind};
pub use subscribers::Subscribe;
