//! # Message handlers and routing resolution.
//!
//! A delivery's routing key names its handler: `order.created` → `ReadOrderCreated`.
//! Handlers are registered explicitly in a [`HandlerRegistry`]; a missing entry is a
//! routing fault for that one delivery.
//!
//! ```text
//! InterpreterCatalog ── build(config, queue) ──► HandlerRegistry ── resolve(routing_key) ──► HandlerRef
//!   default interpreter                              "ReadOrderCreated" → handler
//!   + per-queue override (by name)                   "ReadOrderCancelled" → handler
//! ```
//!
//! - [`Handler`]: async capability `(body, info) -> Result<bool, HandlerError>`.
//! - [`HandlerFn`]: closure-backed handler.
//! - [`Interpreter`]: named bundle that registers handlers.
//! - [`InterpreterCatalog`]: name → interpreter lookup; unresolved names fail at startup.

mod handler;
mod handler_fn;
mod interpreter;
mod registry;

pub use handler::{BoxHandlerFuture, DeliveryInfo, Handler, HandlerRef};
pub use handler_fn::HandlerFn;
pub use interpreter::{Interpreter, InterpreterCatalog, InterpreterRef};
pub use registry::{HandlerRegistry, handler_name};
