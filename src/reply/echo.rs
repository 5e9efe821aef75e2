//! # Built-in `echo` interpreter.
//!
//! Registers one handler per routing key bound to a queue. Each handler acknowledges the
//! delivery and, for requests carrying `reply_to`, answers with the decoded body. Used by
//! the `run` command as the catalog default and handy for wiring checks against a live
//! broker (`ask` round trips).
//!
//! Handlers are registered for literal bind keys; a wildcard bind such as `order.#` does
//! not produce a handler for `order.created`.

use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::error::{ConfigError, HandlerError};
use crate::handlers::{DeliveryInfo, HandlerFn, HandlerRegistry, Interpreter, InterpreterCatalog};
use crate::reply::Publisher;

/// Acknowledge-and-echo handlers for a fixed set of routing keys.
pub struct EchoInterpreter {
    keys: Vec<String>,
    publisher: Arc<Publisher>,
}

impl EchoInterpreter {
    /// Catalog name.
    pub const NAME: &'static str = "echo";

    pub fn new<I, K>(publisher: Arc<Publisher>, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            publisher,
        }
    }

    /// Uses the bind keys of `queue` from `config`.
    ///
    /// # Errors
    /// [`ConfigError::UnknownQueue`] if the queue is not configured.
    pub fn for_queue(
        config: &Config,
        queue: &str,
        publisher: Arc<Publisher>,
    ) -> Result<Self, ConfigError> {
        let keys = config.queue(queue)?.binds.keys().cloned().collect::<Vec<_>>();
        Ok(Self::new(publisher, keys))
    }

    /// Checks, without a broker, that [`catalog`](Self::catalog) can serve `queue`: the
    /// queue is configured and any `[interpreters]` override names `echo`.
    ///
    /// # Errors
    /// [`ConfigError::UnknownQueue`] or [`ConfigError::UnknownInterpreter`].
    pub fn check(config: &Config, queue: &str) -> Result<(), ConfigError> {
        config.queue(queue)?;
        match config.interpreters.get(queue) {
            Some(name) if name != Self::NAME => Err(ConfigError::UnknownInterpreter {
                queue: queue.to_string(),
                name: name.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Catalog used by `run`: `echo` is both the default and selectable by name in
    /// `[interpreters]`.
    ///
    /// # Errors
    /// [`ConfigError::UnknownQueue`] if the queue is not configured.
    pub fn catalog(
        config: &Config,
        queue: &str,
        publisher: Arc<Publisher>,
    ) -> Result<InterpreterCatalog, ConfigError> {
        let echo = Arc::new(Self::for_queue(config, queue, publisher)?);
        Ok(InterpreterCatalog::new()
            .with_default(echo.clone())
            .with(echo))
    }
}

impl Interpreter for EchoInterpreter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn register(&self, registry: &mut HandlerRegistry) -> Result<(), ConfigError> {
        for key in &self.keys {
            let publisher = Arc::clone(&self.publisher);
            registry.on(
                key,
                HandlerFn::arc(Self::NAME, move |body: Value, info: DeliveryInfo| {
                    let publisher = Arc::clone(&publisher);
                    async move {
                        if info.reply_to.is_some() {
                            publisher
                                .reply(&info, body)
                                .await
                                .map_err(|e| HandlerError::fail(e.as_message()))?;
                        }
                        Ok(true)
                    }
                }),
            );
        }
        Ok(())
    }
}
