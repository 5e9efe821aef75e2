use std::sync::Arc;

use crate::broker::ClientRef;
use crate::config::{Config, ExchangeKind, QueueConfig};
use crate::dispatch::Dispatcher;
use crate::error::ConfigError;
use crate::events::Bus;
use crate::handlers::{HandlerRegistry, InterpreterCatalog};
use crate::lifecycle::control::control_plane;
use crate::lifecycle::listener::{Bind, Listener, Topology};

/// Builder for a [`Listener`].
///
/// Every configuration fault (unknown queue, unknown exchange in a bind, unresolvable
/// interpreter) surfaces from [`build`](Self::build), before any broker traffic.
pub struct ListenerBuilder {
    config: Arc<Config>,
    queue: String,
    catalog: InterpreterCatalog,
    registry: Option<HandlerRegistry>,
    bus: Option<Bus>,
    debug: bool,
    default_exchange: Option<String>,
}

impl ListenerBuilder {
    /// Worker for `queue` under `config`.
    pub fn new(config: Arc<Config>, queue: impl Into<String>) -> Self {
        Self {
            config,
            queue: queue.into(),
            catalog: InterpreterCatalog::new(),
            registry: None,
            bus: None,
            debug: false,
            default_exchange: None,
        }
    }

    /// Handlers come from `catalog` (default interpreter plus configured override).
    pub fn with_catalog(mut self, catalog: InterpreterCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Uses `registry` as is, bypassing the catalog.
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Publishes runtime events on `bus` (a private bus otherwise).
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Logs decoded bodies.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Overrides `listener.default_exchange`.
    pub fn with_default_exchange(mut self, exchange: Option<String>) -> Self {
        self.default_exchange = exchange;
        self
    }

    /// Resolves the queue and bind topology without touching the broker, so a
    /// configuration fault is reported before connecting.
    ///
    /// # Errors
    /// [`ConfigError::UnknownQueue`], [`ConfigError::UnknownExchange`].
    pub fn check(&self) -> Result<(), ConfigError> {
        self.topology().map(|_| ())
    }

    fn topology(&self) -> Result<(QueueConfig, Vec<Bind>), ConfigError> {
        let queue_cfg = self.config.queue(&self.queue)?.clone();
        let binds = queue_cfg
            .binds
            .iter()
            .map(|(routing_key, exchange)| {
                let cfg = self.config.exchange(exchange)?.clone();
                Ok(Bind {
                    routing_key: routing_key.clone(),
                    exchange: exchange.clone(),
                    kind: cfg.kind_or(ExchangeKind::Topic),
                    config: cfg,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok((queue_cfg, binds))
    }

    /// Resolves topology and handlers.
    ///
    /// # Errors
    /// [`ConfigError::UnknownQueue`], [`ConfigError::UnknownExchange`],
    /// [`ConfigError::UnknownInterpreter`], [`ConfigError::InvalidHandler`].
    pub fn build(self, client: ClientRef) -> Result<Listener, ConfigError> {
        let (queue_cfg, binds) = self.topology()?;

        let registry = match self.registry {
            Some(r) => r,
            None => self.catalog.build(&self.config, &self.queue)?,
        };

        let bus = self.bus.unwrap_or_default();
        let default_exchange = self
            .default_exchange
            .or_else(|| self.config.listener.default_exchange.clone());
        let dispatcher = Dispatcher::new(self.queue.as_str(), registry, bus.clone())
            .with_auto_ack(queue_cfg.consumer_options.no_ack)
            .with_debug(self.debug)
            .with_default_exchange(default_exchange);

        let (control, inbox) = control_plane();
        Ok(Listener {
            client,
            consumer_tag: self.config.listener.consumer_tag.clone(),
            topology: Topology {
                queue: self.queue,
                config: queue_cfg,
                binds,
            },
            dispatcher,
            bus,
            control,
            inbox,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_toml(
            r#"
            [broker]
            user = "guest"

            [exchanges.market]

            [queues.orders.binds]
            "order.created" = "market"
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_check_accepts_declared_topology() {
        let builder = ListenerBuilder::new(Arc::new(config()), "orders");
        assert!(builder.check().is_ok());
    }

    #[test]
    fn test_check_reports_unknown_queue() {
        let err = ListenerBuilder::new(Arc::new(config()), "audit")
            .check()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownQueue { ref queue } if queue == "audit"));
    }

    #[test]
    fn test_check_reports_bind_to_undeclared_exchange() {
        let mut cfg = config();
        cfg.queues
            .get_mut("orders")
            .unwrap()
            .binds
            .insert("order.cancelled".into(), "ghost".into());

        let err = ListenerBuilder::new(Arc::new(cfg), "orders")
            .check()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownExchange { ref exchange } if exchange == "ghost"));
    }
}
