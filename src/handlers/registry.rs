//! Routing key → handler lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConfigError, DispatchError};
use crate::handlers::handler::{Handler, HandlerRef};

const HANDLER_PREFIX: &str = "Read";

/// Derives the handler name for a routing key.
///
/// The key is split on every non-alphanumeric character; each word is capitalised
/// (first letter upper, rest lower) and the result is prefixed with `Read`.
///
/// ```
/// use queuevisor::handlers::handler_name;
///
/// assert_eq!(handler_name("order.created"), "ReadOrderCreated");
/// assert_eq!(handler_name("ORDER_created"), "ReadOrderCreated");
/// assert_eq!(handler_name("user-signed.up2"), "ReadUserSignedUp2");
/// ```
pub fn handler_name(routing_key: &str) -> String {
    let mut name = String::with_capacity(HANDLER_PREFIX.len() + routing_key.len());
    name.push_str(HANDLER_PREFIX);
    for word in routing_key
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.extend(chars.flat_map(char::to_lowercase));
        }
    }
    name
}

/// Handlers of one consumer process, keyed by handler name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerRef>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `routing_key` (stored under [`handler_name`]).
    pub fn on<H: Handler>(&mut self, routing_key: &str, handler: Arc<H>) -> &mut Self {
        self.handlers.insert(handler_name(routing_key), handler);
        self
    }

    /// Registers a handler under an explicit handler name such as `ReadOrderCreated`.
    ///
    /// The name must be `Read` followed by at least one alphanumeric character.
    pub fn insert(&mut self, name: impl Into<String>, handler: HandlerRef) -> Result<(), ConfigError> {
        let name = name.into();
        let valid = name
            .strip_prefix(HANDLER_PREFIX)
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(char::is_alphanumeric));
        if !valid {
            return Err(ConfigError::InvalidHandler {
                error: format!("handler name must be {HANDLER_PREFIX}<Word>..., got {name:?}"),
                name: handler.name().to_string(),
            });
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Copies every entry of `other` into `self`, replacing same-named handlers.
    pub fn extend(&mut self, other: HandlerRegistry) {
        self.handlers.extend(other.handlers);
    }

    /// Resolves the handler for a routing key.
    pub fn resolve(&self, routing_key: &str) -> Result<(String, HandlerRef), DispatchError> {
        let name = handler_name(routing_key);
        match self.handlers.get(&name) {
            Some(h) => Ok((name, Arc::clone(h))),
            None => Err(DispatchError::Routing {
                routing_key: routing_key.to_string(),
                handler: name,
            }),
        }
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
