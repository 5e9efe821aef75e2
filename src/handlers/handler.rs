//! # Handler capability.
//!
//! A handler receives the decoded JSON body and a [`DeliveryInfo`] and decides the
//! settlement: `Ok(true)` acknowledges, `Ok(false)` or `Err(_)` rejects.
//!
//! ## Example
//! ```
//! use queuevisor::handlers::{BoxHandlerFuture, DeliveryInfo, Handler};
//! use serde_json::Value;
//!
//! struct Orders;
//!
//! impl Handler for Orders {
//!     fn name(&self) -> &str { "orders" }
//!
//!     fn handle(&self, body: Value, _info: DeliveryInfo) -> BoxHandlerFuture {
//!         Box::pin(async move { Ok(body.get("id").is_some()) })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::HandlerError;

/// Future returned by [`Handler::handle`].
pub type BoxHandlerFuture = Pin<Box<dyn Future<Output = Result<bool, HandlerError>> + Send>>;

/// Shared handler handle.
pub type HandlerRef = Arc<dyn Handler>;

/// Delivery context passed to a handler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryInfo {
    /// Exchange the message was published to.
    pub exchange: String,
    /// Queue it was consumed from.
    pub queue: String,
    /// Routing key.
    pub routing_key: String,
    /// Reply queue for request/reply messages.
    pub reply_to: Option<String>,
    /// Message id, when the publisher set one.
    pub message_id: Option<String>,
    /// Listener's default exchange, used by replies that do not name one.
    pub default_exchange: Option<String>,
}

impl DeliveryInfo {
    /// Exchange a reply to this delivery should go to.
    ///
    /// The listener's default exchange wins; otherwise the request's own exchange.
    pub fn reply_exchange(&self) -> &str {
        self.default_exchange.as_deref().unwrap_or(&self.exchange)
    }
}

/// Async message handler.
pub trait Handler: Send + Sync + 'static {
    /// Stable name for logs.
    fn name(&self) -> &str;

    /// Handles one decoded delivery.
    fn handle(&self, body: Value, info: DeliveryInfo) -> BoxHandlerFuture;
}
