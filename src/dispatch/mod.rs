//! # Per-delivery dispatch.
//!
//! [`Dispatcher::dispatch`] takes one delivered envelope through
//! decode → route → invoke → settle and issues exactly one of ack / nack / cancel.
//!
//! ```text
//! envelope ─┬─ body == "quit" ─────────────────────────────► cancel(consumer_tag)
//!           ├─ JSON decode ── err ──────────────────────────► nack  (DispatchError::Decode)
//!           ├─ registry.resolve(routing_key) ── miss ───────► nack  (DispatchError::Routing)
//!           └─ handler(body, info)
//!                 ├─ Ok(true)  ─────────────────────────────► ack
//!                 ├─ Ok(false) ─────────────────────────────► nack
//!                 ├─ Err(e)    ─────────────────────────────► nack  (DispatchError::Handling)
//!                 └─ panic     ─────────────────────────────► nack  (DispatchError::Panicked)
//! ```
//!
//! ## Rules
//! - Per-message faults are logged with method, exchange, queue, routing key and raw body,
//!   published as `DeliveryRejected`, and never returned as errors.
//! - Only transport faults (the settle call itself failing) leave `dispatch` as `Err`.
//! - Settlement happens after the handler future completes.
//! - With `no_ack` consumers the broker already settled; the decision is only reported.

mod dispatcher;

pub use dispatcher::{Dispatcher, QUIT_SENTINEL, Settlement};
