//! # Event subscribers.
//!
//! [`Subscribe`] is the extension point for reacting to runtime [`Event`](crate::Event)s.
//! A [`SubscriberSet`] gives each subscriber its own bounded queue and worker task, and
//! [`SubscriberSet::listen`] wires the set to a [`Bus`](crate::Bus).
//!
//! ```text
//! Bus ──► listener task ──► SubscriberSet ──┬──► [queue] ──► LogWriter      (tracing)
//!                                           ├──► [queue] ──► JournalWriter  (JSON lines)
//!                                           └──► [queue] ──► user subscriber
//! ```
//!
//! ## Built-ins
//! - [`LogWriter`] renders every event through `tracing`.
//! - [`JournalWriter`] appends message events to a JSON-lines file.

mod journal;
mod log;
mod subscribe;
mod subscriber_set;

pub use journal::JournalWriter;
pub use log::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_set::{SubscriberListener, SubscriberSet};
