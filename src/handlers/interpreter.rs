//! # Interpreters: named handler bundles.
//!
//! Every worker starts from the catalog's default interpreter. Configuration may name an
//! override per queue (`[interpreters] orders = "billing"`); its handlers replace
//! same-named default handlers. Lookup is by name against the catalog, and every failure
//! is a [`ConfigError`] raised before consumption starts.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ConfigError;
use crate::handlers::registry::HandlerRegistry;

/// Shared interpreter handle.
pub type InterpreterRef = Arc<dyn Interpreter>;

/// A named set of handlers.
pub trait Interpreter: Send + Sync + 'static {
    /// Name used in configuration.
    fn name(&self) -> &str;

    /// Adds this interpreter's handlers to `registry`.
    fn register(&self, registry: &mut HandlerRegistry) -> Result<(), ConfigError>;
}

/// Name → interpreter lookup.
#[derive(Clone, Default)]
pub struct InterpreterCatalog {
    default: Option<InterpreterRef>,
    entries: HashMap<String, InterpreterRef>,
}

impl InterpreterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interpreter every queue starts from.
    pub fn with_default(mut self, interpreter: InterpreterRef) -> Self {
        self.default = Some(interpreter);
        self
    }

    /// Makes `interpreter` selectable by its name.
    pub fn with(mut self, interpreter: InterpreterRef) -> Self {
        self.entries
            .insert(interpreter.name().to_string(), interpreter);
        self
    }

    /// Looks up a selectable interpreter.
    pub fn get(&self, name: &str) -> Option<&InterpreterRef> {
        self.entries.get(name)
    }

    /// Builds the registry for `queue`: default handlers, then the configured override.
    ///
    /// # Errors
    /// - [`ConfigError::UnknownInterpreter`]: the override name is not in the catalog;
    /// - [`ConfigError::InvalidHandler`]: an interpreter registers a malformed name, or the
    ///   resulting registry is empty.
    pub fn build(&self, config: &Config, queue: &str) -> Result<HandlerRegistry, ConfigError> {
        let mut registry = HandlerRegistry::new();
        if let Some(default) = &self.default {
            default.register(&mut registry)?;
        }

        if let Some(name) = config.interpreters.get(queue) {
            let interpreter = self
                .get(name)
                .ok_or_else(|| ConfigError::UnknownInterpreter {
                    queue: queue.to_string(),
                    name: name.clone(),
                })?;
            let mut overrides = HandlerRegistry::new();
            interpreter.register(&mut overrides)?;
            if overrides.is_empty() {
                return Err(ConfigError::InvalidHandler {
                    name: name.clone(),
                    error: "registers no handlers".to_string(),
                });
            }
            registry.extend(overrides);
        }

        if registry.is_empty() {
            return Err(ConfigError::InvalidHandler {
                name: queue.to_string(),
                error: "no handlers registered for queue".to_string(),
            });
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handlers::{DeliveryInfo, HandlerFn};
    use serde_json::Value;

    struct Fixed {
        name: &'static str,
        keys: &'static [&'static str],
    }

    impl Interpreter for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn register(&self, registry: &mut HandlerRegistry) -> Result<(), ConfigError> {
            let name = self.name;
            for key in self.keys {
                registry.on(
                    key,
                    HandlerFn::arc(name, |_b: Value, _i: DeliveryInfo| async {
                        Ok::<_, HandlerError>(true)
                    }),
                );
            }
            Ok(())
        }
    }

    fn config(interpreters: &str) -> Config {
        Config::from_toml(&format!(
            "[broker]\nuser = \"guest\"\n[queues.orders]\n[interpreters]\n{interpreters}\n"
        ))
        .unwrap()
    }

    fn catalog() -> InterpreterCatalog {
        InterpreterCatalog::new()
            .with_default(Arc::new(Fixed {
                name: "default",
                keys: &["order.created", "ping"],
            }))
            .with(Arc::new(Fixed {
                name: "billing",
                keys: &["order.created"],
            }))
            .with(Arc::new(Fixed {
                name: "hollow",
                keys: &[],
            }))
    }

    #[test]
    fn test_override_replaces_default_handlers() {
        let reg = catalog()
            .build(&config("orders = \"billing\""), "orders")
            .unwrap();
        assert_eq!(reg.resolve("order.created").unwrap().1.name(), "billing");
        assert_eq!(reg.resolve("ping").unwrap().1.name(), "default");
    }

    #[test]
    fn test_unknown_interpreter_is_fatal() {
        let err = catalog()
            .build(&config("orders = \"nope\""), "orders")
            .unwrap_err();
        assert_eq!(err.as_label(), "config_unknown_interpreter");
    }

    #[test]
    fn test_empty_interpreter_is_invalid() {
        let err = catalog()
            .build(&config("orders = \"hollow\""), "orders")
            .unwrap_err();
        assert_eq!(err.as_label(), "config_invalid_handler");
    }

    #[test]
    fn test_no_handlers_at_all_is_invalid() {
        let err = InterpreterCatalog::new()
            .build(&config(""), "orders")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHandler { .. }));
    }
}
