//! # Closure-backed handler (`HandlerFn`)
//!
//! Wraps `F: Fn(Value, DeliveryInfo) -> Fut`; every delivery gets a fresh future.
//! Shared state goes into an explicit `Arc<...>` captured by the closure.
//!
//! ## Example
//! ```rust
//! use queuevisor::handlers::{DeliveryInfo, Handler, HandlerFn, HandlerRef};
//! use queuevisor::HandlerError;
//! use serde_json::Value;
//!
//! let h: HandlerRef = HandlerFn::arc("orders", |body: Value, _info: DeliveryInfo| async move {
//!     Ok::<_, HandlerError>(body.is_object())
//! });
//! assert_eq!(h.name(), "orders");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::HandlerError;
use crate::handlers::handler::{BoxHandlerFuture, DeliveryInfo, Handler};

/// Function-backed handler.
#[derive(Debug)]
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the handler as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Value, DeliveryInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, body: Value, info: DeliveryInfo) -> BoxHandlerFuture {
        Box::pin((self.f)(body, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_each_call_gets_its_own_future() {
        let h = HandlerFn::new("echo", |body: Value, info: DeliveryInfo| async move {
            Ok::<_, HandlerError>(body["ok"].as_bool().unwrap_or(false) && info.queue == "q")
        });
        let info = DeliveryInfo {
            queue: "q".into(),
            ..Default::default()
        };
        assert!(h.handle(serde_json::json!({"ok": true}), info.clone()).await.unwrap());
        assert!(!h.handle(serde_json::json!({"ok": false}), info).await.unwrap());
    }
}
