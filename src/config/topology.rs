//! # Exchange and queue declarations.
//!
//! Read-only topology loaded once at startup and shared by reference for the life of the
//! process. Defaults follow the broker conventions the workers were built against:
//!
//! - exchanges: `durable = true`, `passive = false`, `auto_delete = false`, type from config
//!   (falls back to the caller's type, normally `topic`);
//! - queues: `durable = true`, everything else `false`;
//! - consumers: manual acknowledgement, `x-cancel-on-ha-failover = true`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

/// Declaration arguments (`x-*` table entries).
pub type Arguments = BTreeMap<String, serde_json::Value>;

/// Exchange routing type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Pattern routing on dotted keys (`*` one word, `#` zero or more).
    #[default]
    Topic,
    /// Exact routing-key match.
    Direct,
    /// Header-table match.
    Headers,
    /// Every bound queue receives every message.
    Fanout,
}

impl ExchangeKind {
    /// Wire name of the exchange type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Topic => "topic",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Headers => "headers",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange declaration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Routing type; `None` means "whatever the caller asks for".
    #[serde(rename = "type")]
    pub kind: Option<ExchangeKind>,
    /// Only check that the exchange exists.
    pub passive: bool,
    /// Survive broker restarts.
    pub durable: bool,
    /// Delete once the last binding is gone.
    pub auto_delete: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            kind: None,
            passive: false,
            durable: true,
            auto_delete: false,
        }
    }
}

impl ExchangeConfig {
    /// Returns the configured type, or `fallback` if none is set.
    #[inline]
    pub fn kind_or(&self, fallback: ExchangeKind) -> ExchangeKind {
        self.kind.unwrap_or(fallback)
    }
}

/// Queue declaration flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Only check that the queue exists.
    pub passive: bool,
    /// Survive broker restarts.
    pub durable: bool,
    /// Private to the declaring connection.
    pub exclusive: bool,
    /// Delete once the last consumer is gone.
    pub auto_delete: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Consumer subscription flags.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Do not receive messages published on this connection.
    pub no_local: bool,
    /// Broker auto-acks deliveries (dispatcher settlements become no-ops on the wire).
    pub no_ack: bool,
    /// Sole consumer of the queue.
    pub exclusive: bool,
    /// Consumer arguments.
    pub arguments: Arguments,
}

impl Default for ConsumerOptions {
    /// Manual acknowledgement with `x-cancel-on-ha-failover = true`
    /// (fail over to another node instead of silently losing the consumer).
    fn default() -> Self {
        let mut arguments = Arguments::new();
        arguments.insert(
            "x-cancel-on-ha-failover".to_string(),
            serde_json::Value::Bool(true),
        );
        Self {
            no_local: false,
            no_ack: false,
            exclusive: false,
            arguments,
        }
    }
}

/// Queue declaration with its bindings and consumer options.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Declaration flags (flattened into the queue table).
    #[serde(flatten)]
    pub options: QueueOptions,
    /// Declaration arguments.
    pub arguments: Arguments,
    /// `routing_key → exchange` bindings.
    pub binds: BTreeMap<String, String>,
    /// Subscription flags.
    pub consumer_options: ConsumerOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_defaults_are_durable_topic_fallback() {
        let cfg = ExchangeConfig::default();
        assert!(cfg.durable);
        assert!(!cfg.passive);
        assert_eq!(cfg.kind_or(ExchangeKind::Topic), ExchangeKind::Topic);

        let direct = ExchangeConfig {
            kind: Some(ExchangeKind::Direct),
            ..ExchangeConfig::default()
        };
        assert_eq!(direct.kind_or(ExchangeKind::Topic), ExchangeKind::Direct);
    }

    #[test]
    fn test_consumer_defaults_request_ha_failover_cancel() {
        let opts = ConsumerOptions::default();
        assert!(!opts.no_ack);
        assert_eq!(
            opts.arguments.get("x-cancel-on-ha-failover"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn test_queue_table_flattens_options() {
        let cfg: QueueConfig = toml::from_str(
            r#"
            durable = false
            exclusive = true

            [binds]
            "order.created" = "market"
            "#,
        )
        .unwrap();
        assert!(!cfg.options.durable);
        assert!(cfg.options.exclusive);
        assert_eq!(cfg.binds.get("order.created").map(String::as_str), Some("market"));
        assert_eq!(cfg.consumer_options, ConsumerOptions::default());
    }
}
