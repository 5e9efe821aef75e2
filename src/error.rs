//! Error types used by the queuevisor runtime, its workers and the supervisor.
//!
//! The taxonomy mirrors how each fault is handled:
//!
//! - [`ConfigError`]: fatal at startup; a worker never begins consuming.
//! - [`BrokerError`]: transport faults; terminate the consume loop.
//! - [`DispatchError`]: per-message faults; the delivery is rejected and the loop continues.
//! - [`HandlerError`]: raised by handlers, converted into [`DispatchError::Handling`].
//! - [`AskError`]: request/reply failures surfaced to the caller of `ask`.
//! - [`SupervisionError`]: spawn/signal failures inside the process supervisor; reported, never fatal.
//! - [`ListenerError`]: everything that can end a worker's `run`.
//!
//! Every enum provides `as_label` (stable snake_case label for logs) and `as_message`.

use std::time::Duration;
use thiserror::Error;

/// # Configuration faults.
///
/// Raised while loading or resolving configuration. Always fatal before consumption starts.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("cannot read config {path}: {error}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O error message.
        error: String,
    },

    /// Configuration file is not valid TOML for the expected shape.
    #[error("cannot parse config: {error}")]
    Parse {
        /// Parser error message.
        error: String,
    },

    /// Broker user is empty.
    #[error("parameter 'user' was not set for AMQP connection")]
    MissingUser,

    /// A queue was referenced that has no declaration.
    #[error("amqp queue: {queue} not found")]
    UnknownQueue {
        /// Referenced queue name.
        queue: String,
    },

    /// A bind referenced an exchange that has no declaration.
    #[error("amqp exchange: {exchange} not found")]
    UnknownExchange {
        /// Referenced exchange name.
        exchange: String,
    },

    /// Configured interpreter name is not present in the catalog.
    #[error("interpreter {name:?} configured for queue {queue:?} is not registered")]
    UnknownInterpreter {
        /// Queue the override was configured for.
        queue: String,
        /// Interpreter name from configuration.
        name: String,
    },

    /// Interpreter resolved but does not provide usable handlers.
    #[error("interpreter {name:?} is not a usable handler set: {error}")]
    InvalidHandler {
        /// Interpreter name.
        name: String,
        /// What is wrong with it.
        error: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use queuevisor::ConfigError;
    ///
    /// let err = ConfigError::UnknownQueue { queue: "orders".into() };
    /// assert_eq!(err.as_label(), "config_unknown_queue");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse { .. } => "config_parse",
            ConfigError::MissingUser => "config_missing_user",
            ConfigError::UnknownQueue { .. } => "config_unknown_queue",
            ConfigError::UnknownExchange { .. } => "config_unknown_exchange",
            ConfigError::UnknownInterpreter { .. } => "config_unknown_interpreter",
            ConfigError::InvalidHandler { .. } => "config_invalid_handler",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// # Transport faults.
///
/// Produced by [`BrokerClient`](crate::broker::BrokerClient) and
/// [`BrokerChannel`](crate::broker::BrokerChannel) implementations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Connecting to the broker failed.
    #[error("connection failed: {error}")]
    Connection {
        /// Underlying error message.
        error: String,
    },

    /// The channel was closed (locally or by the broker).
    #[error("channel closed")]
    ChannelClosed,

    /// The connection was closed (locally or by the broker).
    #[error("connection closed")]
    ConnectionClosed,

    /// Exchange/queue declaration or binding was refused.
    #[error("declare failed for {name}: {error}")]
    Declare {
        /// Exchange or queue name.
        name: String,
        /// Underlying error message.
        error: String,
    },

    /// Publishing was refused.
    #[error("publish to {exchange}/{routing_key} failed: {error}")]
    Publish {
        /// Target exchange.
        exchange: String,
        /// Routing key.
        routing_key: String,
        /// Underlying error message.
        error: String,
    },

    /// Starting or cancelling a consumer failed.
    #[error("consume on {queue} failed: {error}")]
    Consume {
        /// Queue name (or consumer tag for cancel).
        queue: String,
        /// Underlying error message.
        error: String,
    },

    /// Ack/nack was refused.
    #[error("settling delivery {tag} failed: {error}")]
    Settle {
        /// Delivery tag.
        tag: u64,
        /// Underlying error message.
        error: String,
    },

    /// Attempted to send an empty message.
    #[error("AMQP message can not be empty")]
    EmptyMessage,

    /// Payload could not be JSON-encoded.
    #[error("cannot encode message: {error}")]
    Encode {
        /// Encoder error message.
        error: String,
    },
}

impl BrokerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::Connection { .. } => "broker_connection",
            BrokerError::ChannelClosed => "broker_channel_closed",
            BrokerError::ConnectionClosed => "broker_connection_closed",
            BrokerError::Declare { .. } => "broker_declare",
            BrokerError::Publish { .. } => "broker_publish",
            BrokerError::Consume { .. } => "broker_consume",
            BrokerError::Settle { .. } => "broker_settle",
            BrokerError::EmptyMessage => "broker_empty_message",
            BrokerError::Encode { .. } => "broker_encode",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }

    /// Indicates that the underlying channel or connection is gone.
    ///
    /// A consume loop observing such an error cannot continue.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            BrokerError::ChannelClosed | BrokerError::ConnectionClosed
        )
    }
}

/// # Failure reported by a message handler.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Handling failed; the delivery will be rejected.
    #[error("handler failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },
}

impl HandlerError {
    /// Convenience constructor.
    pub fn fail(error: impl Into<String>) -> Self {
        HandlerError::Fail {
            error: error.into(),
        }
    }
}

/// # Per-message faults.
///
/// Recovered inside the dispatch loop: the delivery is rejected, the fault is reported
/// with full context, and the next delivery is awaited.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Body is not valid JSON.
    #[error("Invalid or malformed JSON. {error}")]
    Decode {
        /// Decoder error message.
        error: String,
    },

    /// No handler is registered for the routing key.
    #[error("Unknown routing key '{routing_key}'.")]
    Routing {
        /// Routing key of the delivery.
        routing_key: String,
        /// Handler name derived from the routing key.
        handler: String,
    },

    /// Handler returned an error.
    #[error("consumer fail: {error}")]
    Handling {
        /// Handler error message.
        error: String,
    },

    /// Handler panicked.
    #[error("consumer panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use queuevisor::DispatchError;
    ///
    /// let err = DispatchError::Decode { error: "eof".into() };
    /// assert_eq!(err.as_label(), "dispatch_decode");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Decode { .. } => "dispatch_decode",
            DispatchError::Routing { .. } => "dispatch_routing",
            DispatchError::Handling { .. } => "dispatch_handling",
            DispatchError::Panicked { .. } => "dispatch_panicked",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// # Request/reply failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AskError {
    /// No reply arrived before the deadline.
    #[error("no reply within {timeout:?}")]
    Timeout {
        /// The caller-supplied timeout.
        timeout: Duration,
    },

    /// Another `ask` is already waiting on the same reply queue.
    #[error("request {correlation_id:?} is already pending")]
    Busy {
        /// Correlation id (reply queue name) in use.
        correlation_id: String,
    },

    /// The reply consumer was cancelled before a reply arrived.
    #[error("reply consumer cancelled before a reply arrived")]
    ConsumerGone,

    /// Transport fault while asking.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl AskError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            AskError::Timeout { .. } => "ask_timeout",
            AskError::Busy { .. } => "ask_busy",
            AskError::ConsumerGone => "ask_consumer_gone",
            AskError::Broker(_) => "ask_broker",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// # Process-supervision faults.
///
/// Reported by the supervisor; a failed pass is retried by the next scheduled pass.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisionError {
    /// Launching a worker failed.
    #[error("cannot spawn worker for {queue}: {error}")]
    Spawn {
        /// Queue the worker was meant for.
        queue: String,
        /// Underlying error message.
        error: String,
    },

    /// Delivering a termination signal failed.
    #[error("cannot signal pid {pid}: {error}")]
    Signal {
        /// Target process id.
        pid: u32,
        /// Underlying error message.
        error: String,
    },
}

impl SupervisionError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisionError::Spawn { .. } => "supervision_spawn",
            SupervisionError::Signal { .. } => "supervision_signal",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// # Errors that end a worker's `run`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Fatal configuration fault.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport fault; restarting is the supervisor's job.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// OS signal handlers could not be installed.
    #[error("unable to process signals: {error}")]
    Signals {
        /// Underlying I/O error message.
        error: String,
    },
}

impl ListenerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ListenerError::Config(e) => e.as_label(),
            ListenerError::Broker(e) => e.as_label(),
            ListenerError::Signals { .. } => "listener_signals",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_errors_are_detected() {
        assert!(BrokerError::ChannelClosed.is_closed());
        assert!(BrokerError::ConnectionClosed.is_closed());
        assert!(!BrokerError::EmptyMessage.is_closed());
    }

    #[test]
    fn test_listener_error_reuses_inner_label() {
        let err = ListenerError::from(ConfigError::MissingUser);
        assert_eq!(err.as_label(), "config_missing_user");

        let err = ListenerError::from(BrokerError::ConnectionClosed);
        assert_eq!(err.as_label(), "broker_connection_closed");
    }

    #[test]
    fn test_routing_message_names_the_key() {
        let err = DispatchError::Routing {
            routing_key: "order.created".into(),
            handler: "ReadOrderCreated".into(),
        };
        assert_eq!(err.as_message(), "Unknown routing key 'order.created'.");
    }
}
