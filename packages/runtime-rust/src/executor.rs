//! Future-backed executors.
//!
//! [`FutureExecutor`] turns an async function of the operation's context
//! into an [`Executor`]: every run spawns the future on a tokio runtime and
//! settles the cycle with its result.

use std::future::Future;
use std::sync::Arc;

use deputizer_core::{Completer, Executor, Operation, Registry, Value};
use tokio::runtime::Handle;
use tracing::warn;

/// Result of one asynchronous run: `Ok` settles through `succeed`, `Err`
/// through `fail`. Both carry the argument list fanned out to handlers.
pub type RunResult = Result<Vec<Value>, Vec<Value>>;

// ---------------------------------------------------------------------------
// FutureExecutor
// ---------------------------------------------------------------------------

/// Executor that spawns one future per run on a tokio runtime.
///
/// A future that panics settles its run as a failure whose single argument
/// is the panic description, so the operation never stays active forever.
pub struct FutureExecutor<F> {
    handle: Handle,
    factory: F,
}

impl<F, Fut> FutureExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RunResult> + Send + 'static,
{
    /// Creates an executor spawning onto `handle`.
    pub fn new(handle: Handle, factory: F) -> Self {
        Self { handle, factory }
    }

    /// Creates an executor spawning onto the runtime of the caller.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a tokio runtime.
    pub fn current(factory: F) -> Self {
        Self::new(Handle::current(), factory)
    }
}

impl<F, Fut> Executor for FutureExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RunResult> + Send + 'static,
{
    fn execute(&self, context: &Value, succeed: Completer, fail: Completer) {
        let run = self.handle.spawn((self.factory)(context.clone()));
        self.handle.spawn(async move {
            match run.await {
                Ok(Ok(args)) => succeed.complete(args),
                Ok(Err(args)) => fail.complete(args),
                Err(join_error) => {
                    warn!(error = %join_error, "operation future did not finish");
                    fail.complete(vec![Value::String(join_error.to_string())])
                }
            };
        });
    }
}

// ---------------------------------------------------------------------------
// AsyncDefine
// ---------------------------------------------------------------------------

/// Defines operations from async functions.
pub trait AsyncDefine {
    /// Defines `key` with a [`FutureExecutor`] on the current runtime.
    ///
    /// # Errors
    ///
    /// Same as [`Registry::define`].
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a tokio runtime.
    fn define_async<F, Fut>(&self, key: &str, factory: F) -> deputizer_core::Result<Operation>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunResult> + Send + 'static;

    /// Same as [`AsyncDefine::define_async`], with the executor bound to
    /// `context`.
    ///
    /// # Errors
    ///
    /// Same as [`Registry::define`].
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a tokio runtime.
    fn define_async_with_context<F, Fut>(
        &self,
        key: &str,
        factory: F,
        context: Value,
    ) -> deputizer_core::Result<Operation>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunResult> + Send + 'static;
}

impl AsyncDefine for Registry {
    fn define_async<F, Fut>(&self, key: &str, factory: F) -> deputizer_core::Result<Operation>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunResult> + Send + 'static,
    {
        self.define_executor(key, Arc::new(FutureExecutor::current(factory)), None)
    }

    fn define_async_with_context<F, Fut>(
        &self,
        key: &str,
        factory: F,
        context: Value,
    ) -> deputizer_core::Result<Operation>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunResult> + Send + 'static,
    {
        self.define_executor(
            key,
            Arc::new(FutureExecutor::current(factory)),
            Some(context),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
