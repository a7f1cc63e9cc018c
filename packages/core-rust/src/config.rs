//! Registry configuration.
//!
//! [`DeputizerConfig::default()`] is the process-wide default set. A registry
//! built from [`ConfigOverrides`] takes the explicitly set values and fills
//! the rest from the defaults.

use std::fmt;
use std::sync::Arc;

use crate::error::{DeputizerError, HandlerFailure, Result};
use crate::types::Value;

/// Hook receiving every handler failure contained during fanout.
pub type ErrorHook = Arc<dyn Fn(&HandlerFailure) + Send + Sync>;

/// Configuration shared by every operation of a registry.
#[derive(Clone)]
pub struct DeputizerConfig {
    /// Whether results are reused by calls that do not ask for freshness.
    /// When false, every call runs the executor.
    pub cache: bool,
    /// Default freshness for calls that do not specify one.
    pub fresh: bool,
    /// Receives handler failures. `None` means failures are swallowed
    /// (logged at debug level only).
    pub on_operation_error: Option<ErrorHook>,
    /// Context used by executors and handlers registered without one.
    pub default_context: Value,
}

impl Default for DeputizerConfig {
    fn default() -> Self {
        Self {
            cache: true,
            fresh: false,
            on_operation_error: None,
            default_context: Value::empty_map(),
        }
    }
}

impl fmt::Debug for DeputizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeputizerConfig")
            .field("cache", &self.cache)
            .field("fresh", &self.fresh)
            .field("on_operation_error", &self.on_operation_error.is_some())
            .field("default_context", &self.default_context)
            .finish()
    }
}

impl DeputizerConfig {
    /// Applies `overrides` over the process-wide defaults.
    #[must_use]
    pub fn merged(overrides: ConfigOverrides) -> Self {
        overrides.merge_over(&Self::default())
    }

    /// Freshness used when a call leaves it unspecified.
    #[must_use]
    pub fn default_freshness(&self) -> bool {
        self.fresh || !self.cache
    }

    /// Delivers a handler failure to the hook, if one is configured.
    pub(crate) fn report(&self, failure: &HandlerFailure) {
        match &self.on_operation_error {
            Some(hook) => hook(failure),
            None => tracing::debug!(
                key = %failure.key,
                error = %failure.cause,
                "handler failed with no error hook configured"
            ),
        }
    }
}

/// Explicitly set configuration values. Unset fields inherit the defaults.
#[derive(Clone, Default)]
pub struct ConfigOverrides {
    pub cache: Option<bool>,
    pub fresh: Option<bool>,
    /// `Some(None)` explicitly clears the hook.
    #[allow(clippy::option_option)]
    pub on_operation_error: Option<Option<ErrorHook>>,
    /// Merged recursively over the default context.
    pub default_context: Option<Value>,
}

impl fmt::Debug for ConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOverrides")
            .field("cache", &self.cache)
            .field("fresh", &self.fresh)
            .field(
                "on_operation_error",
                &self.on_operation_error.as_ref().map(Option::is_some),
            )
            .field("default_context", &self.default_context)
            .finish()
    }
}

impl ConfigOverrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = Some(fresh);
        self
    }

    /// Installs a hook receiving handler failures.
    #[must_use]
    pub fn on_operation_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HandlerFailure) + Send + Sync + 'static,
    {
        self.on_operation_error = Some(Some(Arc::new(hook)));
        self
    }

    /// Explicitly disables the error hook, even if the base configuration
    /// has one.
    #[must_use]
    pub fn without_error_hook(mut self) -> Self {
        self.on_operation_error = Some(None);
        self
    }

    #[must_use]
    pub fn default_context(mut self, context: Value) -> Self {
        self.default_context = Some(context);
        self
    }

    /// Parses overrides from a JSON object with the optional fields `cache`,
    /// `fresh` and `defaultContext` (or `default_context`). Unknown fields are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `json` is not an object, or if `cache`
    /// or `fresh` are present but not booleans.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        const ORIGIN: &str = "ConfigOverrides::from_json";

        let serde_json::Value::Object(fields) = json else {
            return Err(DeputizerError::invalid_argument(
                ORIGIN,
                format!(
                    "configuration must be an object, not {}",
                    json_type_name(json)
                ),
            ));
        };

        let flag = |name: &str| -> Result<Option<bool>> {
            match fields.get(name) {
                None => Ok(None),
                Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
                Some(other) => Err(DeputizerError::invalid_argument(
                    ORIGIN,
                    format!("`{name}` must be a boolean, not {}", json_type_name(other)),
                )),
            }
        };

        let default_context = fields
            .get("defaultContext")
            .or_else(|| fields.get("default_context"))
            .cloned()
            .map(Value::from);

        Ok(Self {
            cache: flag("cache")?,
            fresh: flag("fresh")?,
            on_operation_error: None,
            default_context,
        })
    }

    /// Produces a full configuration where set fields win over `base`.
    #[must_use]
    pub fn merge_over(self, base: &DeputizerConfig) -> DeputizerConfig {
        let default_context = match self.default_context {
            Some(mut context) => {
                context.merge_top_down(&base.default_context);
                context
            }
            None => base.default_context.clone(),
        };
        DeputizerConfig {
            cache: self.cache.unwrap_or(base.cache),
            fresh: self.fresh.unwrap_or(base.fresh),
            on_operation_error: self
                .on_operation_error
                .unwrap_or_else(|| base.on_operation_error.clone()),
            default_context,
        }
    }
}

fn json_type_name(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
