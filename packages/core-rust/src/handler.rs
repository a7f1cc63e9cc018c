//! Callback registrations and per-call options.
//!
//! A [`Handler`] is the `(on_success, on_failure, context)` triple stored in
//! an operation's persistent and one-shot queues. [`ExecuteOptions`] carries
//! the optional freshness flag and optional handler of a single `execute`
//! call.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::types::{Outcome, OutcomeKind, Value};

/// Callback invoked with the handler's context and the outcome's arguments.
///
/// Returning `Err` (or panicking) is contained by the operation and reported
/// to the error hook.
pub type HandlerFn = Arc<dyn Fn(&Value, &[Value]) -> anyhow::Result<()> + Send + Sync>;

/// A success callback with an optional failure callback and an optional
/// context.
///
/// The builder covers every accepted call shape: `(success)`,
/// `(success, failure)`, `(success, context)` and
/// `(success, failure, context)`.
#[derive(Clone)]
pub struct Handler {
    on_success: HandlerFn,
    on_failure: Option<HandlerFn>,
    context: Option<Value>,
}

impl Handler {
    #[must_use]
    pub fn new<F>(on_success: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            on_success: Arc::new(on_success),
            on_failure: None,
            context: None,
        }
    }

    #[must_use]
    pub fn with_failure<F>(mut self, on_failure: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(on_failure));
        self
    }

    /// Binds the callbacks to `context`. Without one, the registry's default
    /// context is used.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn has_failure(&self) -> bool {
        self.on_failure.is_some()
    }

    #[must_use]
    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    /// Fills in the context if none was given.
    pub(crate) fn bind_default(mut self, default_context: &Value) -> Self {
        if self.context.is_none() {
            self.context = Some(default_context.clone());
        }
        self
    }

    fn callback_for(&self, kind: OutcomeKind) -> Option<&HandlerFn> {
        match kind {
            OutcomeKind::Success => Some(&self.on_success),
            OutcomeKind::Failure => self.on_failure.as_ref(),
        }
    }

    /// Runs the callback matching the outcome's kind, containing errors and
    /// panics. A handler without a matching callback is skipped.
    pub(crate) fn invoke(&self, outcome: &Outcome) -> anyhow::Result<()> {
        match self.callback_for(outcome.kind) {
            Some(callback) => self.call(callback, &outcome.args),
            None => Ok(()),
        }
    }

    /// Serves a cached outcome. Same as [`Handler::invoke`], except that a
    /// handler without a failure callback gets a cached failure through its
    /// success callback, so every cache hit is answered.
    pub(crate) fn replay(&self, outcome: &Outcome) -> anyhow::Result<()> {
        let callback = self
            .callback_for(outcome.kind)
            .unwrap_or(&self.on_success);
        self.call(callback, &outcome.args)
    }

    fn call(&self, callback: &HandlerFn, args: &[Value]) -> anyhow::Result<()> {
        let null = Value::Null;
        let context = self.context.as_ref().unwrap_or(&null);
        match catch_unwind(AssertUnwindSafe(|| callback(context, args))) {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("has_failure", &self.has_failure())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Arguments of one `execute` call.
///
/// `fresh: None` defers to the registry's configured default freshness.
/// Without a handler the call only triggers a run when one is needed, for
/// its side effects on persistent handlers and the cache.
#[derive(Clone, Debug, Default)]
pub struct ExecuteOptions {
    pub fresh: Option<bool>,
    pub handler: Option<Handler>,
}

impl ExecuteOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = Some(fresh);
        self
    }

    #[must_use]
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl From<()> for ExecuteOptions {
    fn from((): ()) -> Self {
        Self::default()
    }
}

impl From<bool> for ExecuteOptions {
    fn from(fresh: bool) -> Self {
        Self::new().fresh(fresh)
    }
}

impl From<Handler> for ExecuteOptions {
    fn from(handler: Handler) -> Self {
        Self::new().handler(handler)
    }
}

impl From<(bool, Handler)> for ExecuteOptions {
    fn from((fresh, handler): (bool, Handler)) -> Self {
        Self::new().fresh(fresh).handler(handler)
    }
}
