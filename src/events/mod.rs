//! Runtime events: types and broadcast bus.
//!
//! Workers and the process supervisor describe what happened as [`Event`]s and publish
//! them on a [`Bus`]. Subscribers (log writer, delivery journal, user code) observe them
//! without being able to slow the consume loop down.
//!
//! ## Quick reference
//! - **Publishers**: `Dispatcher` (settlements), `Publisher` / `Requester` (outbound
//!   messages), `Listener` (state changes, probes), `ProcessSupervisor`
//!   (spawn/kill), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `SubscriberSet` fan-out, tests.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
