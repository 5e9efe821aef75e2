//! # Outbound messages and request/reply.
//!
//! - [`Publisher`]: `send` (declares a topic exchange first), `send_delayed` (`x-delay`
//!   header), and `reply` to a request's `reply_to` queue.
//! - [`Requester::ask`]: synchronous call over asynchronous messaging.
//! - [`EchoInterpreter`]: acknowledge-and-echo handlers for a queue's bind keys.
//!
//! ```text
//! ask(queue, exchange, key, msg, T)
//!   ├─ declare queue ──► reply_queue
//!   ├─ claim PendingRequests[reply_queue]          (Busy if already pending)
//!   ├─ bind reply_queue ─► exchange  (routing key = reply_queue)
//!   ├─ consume reply_queue
//!   ├─ publish msg { reply_to = reply_queue } ─► exchange / key
//!   └─ loop wait(deadline - now)
//!         ├─ Delivery ─► ack, fulfil slot ─► Ok(body)
//!         ├─ Idle     ─► deadline passed ─► Err(Timeout)
//!         └─ Drained  ─► Err(ConsumerGone)
//! ```
//!
//! The reply queue and its binding stay behind after `ask` returns; removing them is the
//! caller's business. Each call runs on its own channel.

mod echo;
mod pending;
mod publisher;
mod requester;

pub use echo::EchoInterpreter;
pub use pending::{PendingGuard, PendingRequests};
pub use publisher::Publisher;
pub use requester::Requester;
