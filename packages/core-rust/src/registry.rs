use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::config::{ConfigOverrides, DeputizerConfig};
use crate::error::{DeputizerError, Result};
use crate::handler::{ExecuteOptions, Handler};
use crate::operation::{Completer, Executor, Operation};
use crate::types::Value;

/// Rejects empty and whitespace-only keys.
fn validate_key(origin: &'static str, key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(DeputizerError::invalid_argument(
            origin,
            "an invalid operation key has been specified",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// An isolated namespace of operations keyed by name.
///
/// Registries share nothing: each one owns its operations and its
/// configuration. Entries are added or replaced by `define` and never
/// removed implicitly.
///
/// Operation handles are cloned out of the map before they run, so executors
/// and handlers may call back into the registry.
pub struct Registry {
    config: Arc<DeputizerConfig>,
    operations: DashMap<String, Operation>,
}

impl Registry {
    /// Creates a registry using the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DeputizerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: DeputizerConfig) -> Self {
        Self {
            config: Arc::new(config),
            operations: DashMap::new(),
        }
    }

    /// Creates a registry whose configuration is `overrides` merged over the
    /// defaults.
    #[must_use]
    pub fn with_overrides(overrides: ConfigOverrides) -> Self {
        Self::with_config(DeputizerConfig::merged(overrides))
    }

    #[must_use]
    pub fn config(&self) -> &DeputizerConfig {
        &self.config
    }

    /// Defines (or replaces) the operation under `key`, running against the
    /// registry's default context.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty key, `Conflict` if the operation
    /// currently defined under `key` is active.
    pub fn define<F>(&self, key: &str, executor: F) -> Result<Operation>
    where
        F: Fn(&Value, Completer, Completer) + Send + Sync + 'static,
    {
        self.define_executor(key, Arc::new(executor), None)
    }

    /// Same as [`Registry::define`], with the executor bound to `context`.
    ///
    /// # Errors
    ///
    /// See [`Registry::define`].
    pub fn define_with_context<F>(&self, key: &str, executor: F, context: Value) -> Result<Operation>
    where
        F: Fn(&Value, Completer, Completer) + Send + Sync + 'static,
    {
        self.define_executor(key, Arc::new(executor), Some(context))
    }

    /// Defines an operation from any [`Executor`] implementation.
    ///
    /// Replacing an inactive operation discards its cached outcome and both
    /// of its handler queues.
    ///
    /// # Errors
    ///
    /// See [`Registry::define`].
    pub fn define_executor(
        &self,
        key: &str,
        executor: Arc<dyn Executor>,
        context: Option<Value>,
    ) -> Result<Operation> {
        validate_key("Registry::define", key)?;
        let operation = Operation::new(key, executor, context, self.config.clone());

        match self.operations.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_active() {
                    return Err(DeputizerError::Conflict {
                        key: key.to_string(),
                    });
                }
                debug!(key, "replacing operation definition");
                entry.insert(operation.clone());
            }
            Entry::Vacant(entry) => {
                debug!(key, "defining operation");
                entry.insert(operation.clone());
            }
        }
        Ok(operation)
    }

    /// Returns true if `key` is defined.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty key.
    pub fn knows(&self, key: &str) -> Result<bool> {
        validate_key("Registry::knows", key)?;
        Ok(self.operations.contains_key(key))
    }

    /// Returns the active flag of the operation under `key`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty key, `UnknownKey` if undefined.
    pub fn is_active(&self, key: &str) -> Result<bool> {
        Ok(self.lookup("Registry::is_active", key)?.is_active())
    }

    /// Returns a handle to the operation under `key`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty key, `UnknownKey` if undefined.
    pub fn operation(&self, key: &str) -> Result<Operation> {
        self.lookup("Registry::operation", key)
    }

    /// Registers a handler called on every completion of `key`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty key, `UnknownKey` if undefined.
    pub fn when(&self, key: &str, handler: Handler) -> Result<&Self> {
        self.lookup("Registry::when", key)?.when(handler);
        Ok(self)
    }

    /// Registers a handler called on the next completion of `key` only.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty key, `UnknownKey` if undefined.
    pub fn once(&self, key: &str, handler: Handler) -> Result<&Self> {
        self.lookup("Registry::once", key)?.once(handler);
        Ok(self)
    }

    /// Requests the result of `key`; see [`Operation::execute`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty key, `UnknownKey` if undefined.
    pub fn execute(&self, key: &str, options: impl Into<ExecuteOptions>) -> Result<&Self> {
        self.lookup("Registry::execute", key)?.execute(options);
        Ok(self)
    }

    /// Alias of [`Registry::execute`].
    ///
    /// # Errors
    ///
    /// See [`Registry::execute`].
    pub fn fetch(&self, key: &str, options: impl Into<ExecuteOptions>) -> Result<&Self> {
        self.execute(key, options)
    }

    fn lookup(&self, origin: &'static str, key: &str) -> Result<Operation> {
        validate_key(origin, key)?;
        self.operations
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DeputizerError::UnknownKey {
                origin,
                key: key.to_string(),
            })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("operations", &self.operations.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
