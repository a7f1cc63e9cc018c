//! The per-key coalescing and fanout engine.
//!
//! An [`Operation`] is idle until `execute` decides a run is needed, at which
//! point it turns active and invokes its executor once. Every `execute` that
//! arrives while it is active attaches to the in-flight run instead of
//! starting another. When the executor settles through one of its
//! [`Completer`]s, the outcome is cached, delivered to the one-shot queue
//! (drained FIFO) and then to the persistent handlers (in registration
//! order), and the operation returns to idle.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::DeputizerConfig;
use crate::error::HandlerFailure;
use crate::handler::{ExecuteOptions, Handler};
use crate::types::{Outcome, OutcomeKind, Value};

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// The caller-supplied action behind an operation.
///
/// Invoked with the operation's bound context and two completion entry
/// points. It must eventually call exactly one of them; the call may happen
/// synchronously or later from any thread.
///
/// Implemented for every `Fn(&Value, Completer, Completer)` closure.
pub trait Executor: Send + Sync {
    fn execute(&self, context: &Value, succeed: Completer, fail: Completer);
}

impl<F> Executor for F
where
    F: Fn(&Value, Completer, Completer) + Send + Sync,
{
    fn execute(&self, context: &Value, succeed: Completer, fail: Completer) {
        self(context, succeed, fail);
    }
}

// ---------------------------------------------------------------------------
// Completer
// ---------------------------------------------------------------------------

/// One completion entry point (`succeed` or `fail`) of an execution cycle.
///
/// Both completers of a cycle share a settled flag: the first `complete`
/// call on either of them settles the cycle, every later call is a no-op.
#[derive(Clone)]
pub struct Completer {
    operation: Operation,
    kind: OutcomeKind,
    cycle: u64,
    settled: Arc<AtomicBool>,
}

impl Completer {
    /// Which outcome this entry point produces.
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        self.kind
    }

    /// Returns true once either completer of this cycle has been called.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Settles the cycle with `args` as the result and fans it out.
    ///
    /// Returns `false` without side effects if the cycle was already settled.
    pub fn complete(&self, args: Vec<Value>) -> bool {
        if self.settled.swap(true, Ordering::AcqRel) {
            warn!(
                key = %self.operation.key(),
                cycle = self.cycle,
                kind = ?self.kind,
                "ignoring repeated completion of an already settled run"
            );
            return false;
        }
        self.operation.settle(
            self.cycle,
            Outcome {
                kind: self.kind,
                args,
            },
        );
        true
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("key", &self.operation.key())
            .field("kind", &self.kind)
            .field("cycle", &self.cycle)
            .field("settled", &self.is_settled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

struct Inner {
    key: String,
    executor: Arc<dyn Executor>,
    context: Value,
    config: Arc<DeputizerConfig>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    active: bool,
    /// Set while a settled outcome is being fanned out.
    draining: bool,
    /// A run was requested during the drain; start it once the drain ends.
    rerun: bool,
    /// Number of executor invocations so far.
    cycle: u64,
    cached: Option<Arc<Outcome>>,
    persistent: Vec<Arc<Handler>>,
    once: VecDeque<Handler>,
}

/// A named action with coalesced execution and a cached latest outcome.
///
/// Cheap to clone; clones share state. The state lock is never held while
/// the executor or a handler runs, so both may call back into the operation.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<Inner>,
}

impl Operation {
    pub(crate) fn new(
        key: &str,
        executor: Arc<dyn Executor>,
        context: Option<Value>,
        config: Arc<DeputizerConfig>,
    ) -> Self {
        let context = context.unwrap_or_else(|| config.default_context.clone());
        Self {
            inner: Arc::new(Inner {
                key: key.to_string(),
                executor,
                context,
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The context the executor runs against.
    #[must_use]
    pub fn context(&self) -> &Value {
        &self.inner.context
    }

    /// True from executor invocation until its first completion.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// The outcome of the latest completed run, if any.
    #[must_use]
    pub fn cached(&self) -> Option<Outcome> {
        self.inner.state.lock().cached.as_deref().cloned()
    }

    /// Registers a handler called on every completion.
    pub fn when(&self, handler: Handler) -> &Self {
        let handler = handler.bind_default(&self.inner.config.default_context);
        self.inner.state.lock().persistent.push(Arc::new(handler));
        self
    }

    /// Registers a handler called on the next completion only.
    pub fn once(&self, handler: Handler) -> &Self {
        let handler = handler.bind_default(&self.inner.config.default_context);
        self.inner.state.lock().once.push_back(handler);
        self
    }

    /// Requests the operation's result.
    ///
    /// Runs the executor when `fresh` is set or nothing is cached, unless a
    /// run is already in flight, in which case the handler joins that run.
    /// A run requested while an outcome is being fanned out starts as soon
    /// as that fanout ends. Otherwise the handler, if any, is served synchronously from the cache.
    pub fn execute(&self, options: impl Into<ExecuteOptions>) -> &Self {
        let ExecuteOptions { fresh, handler } = options.into();
        let fresh = fresh.unwrap_or_else(|| self.inner.config.default_freshness());
        let handler = handler.map(|h| h.bind_default(&self.inner.config.default_context));

        let mut state = self.inner.state.lock();
        let should_run = fresh || state.cached.is_none();

        if !should_run {
            let cached = state.cached.clone();
            drop(state);
            if let (Some(handler), Some(outcome)) = (handler, cached) {
                debug!(key = %self.inner.key, "serving cached outcome");
                self.replay(&handler, &outcome);
            }
            return self;
        }

        if let Some(handler) = handler {
            state.once.push_back(handler);
        }
        if state.active {
            if state.draining {
                // The draining cycle already took its once-queue.
                state.rerun = true;
                debug!(key = %self.inner.key, cycle = state.cycle, "run queued behind fanout");
            } else {
                debug!(key = %self.inner.key, cycle = state.cycle, "attached to in-flight run");
            }
            return self;
        }

        state.active = true;
        state.cycle += 1;
        let cycle = state.cycle;
        drop(state);

        self.start(cycle);
        self
    }

    /// Alias of [`Operation::execute`].
    pub fn fetch(&self, options: impl Into<ExecuteOptions>) -> &Self {
        self.execute(options)
    }

    /// Invokes the executor for `cycle`. Must be called without the lock.
    fn start(&self, cycle: u64) {
        let settled = Arc::new(AtomicBool::new(false));
        let completer = |kind| Completer {
            operation: self.clone(),
            kind,
            cycle,
            settled: settled.clone(),
        };
        let succeed = completer(OutcomeKind::Success);
        let fail = completer(OutcomeKind::Failure);

        debug!(key = %self.inner.key, cycle, "invoking executor");
        self.inner
            .executor
            .execute(&self.inner.context, succeed, fail);
    }

    fn settle(&self, cycle: u64, outcome: Outcome) {
        let outcome = Arc::new(outcome);
        let (once, persistent) = {
            let mut state = self.inner.state.lock();
            state.cached = Some(outcome.clone());
            state.draining = true;
            (std::mem::take(&mut state.once), state.persistent.clone())
        };

        debug!(
            key = %self.inner.key,
            cycle,
            kind = ?outcome.kind,
            once = once.len(),
            persistent = persistent.len(),
            "fanning out outcome"
        );

        // Handlers queued while this loop runs wait for the next cycle.
        for handler in once {
            self.deliver(&handler, &outcome);
        }
        for handler in &persistent {
            self.deliver(handler, &outcome);
        }

        let mut state = self.inner.state.lock();
        state.draining = false;
        if !std::mem::take(&mut state.rerun) {
            state.active = false;
            return;
        }
        state.cycle += 1;
        let next = state.cycle;
        drop(state);
        self.start(next);
    }

    fn deliver(&self, handler: &Handler, outcome: &Outcome) {
        self.contain(handler.invoke(outcome));
    }

    fn replay(&self, handler: &Handler, outcome: &Outcome) {
        self.contain(handler.replay(outcome));
    }

    fn contain(&self, result: anyhow::Result<()>) {
        if let Err(cause) = result {
            let failure = HandlerFailure::new(&self.inner.key, cause);
            self.inner.config.report(&failure);
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Operation")
            .field("key", &self.inner.key)
            .field("active", &state.active)
            .field("cycle", &state.cycle)
            .field("cached", &state.cached)
            .field("persistent", &state.persistent.len())
            .field("once", &state.once.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    use crate::config::ConfigOverrides;

    use super::*;

    /// Executor that records its invocations and parks the completers until
    /// the test settles them.
    #[derive(Default)]
    struct Deferred {
        calls: AtomicUsize,
        pending: Mutex<Vec<(Completer, Completer)>>,
    }

    impl Deferred {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn take(&self) -> (Completer, Completer) {
            self.pending.lock().remove(0)
        }
    }

    impl Executor for Deferred {
        fn execute(&self, _context: &Value, succeed: Completer, fail: Completer) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pending.lock().push((succeed, fail));
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn operation_with(executor: Arc<Deferred>, config: DeputizerConfig) -> Operation {
        Operation::new("op", executor, None, Arc::new(config))
    }

    fn deferred_operation() -> (Operation, Arc<Deferred>) {
        let executor = Arc::new(Deferred::default());
        (
            operation_with(executor.clone(), DeputizerConfig::default()),
            executor,
        )
    }

    fn recording(log: &Log, name: &'static str) -> Handler {
        let success_log = log.clone();
        let failure_log = log.clone();
        Handler::new(move |_, args| {
            success_log.lock().push(format!("{name}:ok:{args:?}"));
            Ok(())
        })
        .with_failure(move |_, args| {
            failure_log.lock().push(format!("{name}:err:{args:?}"));
            Ok(())
        })
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[test]
    fn concurrent_executes_coalesce_into_one_run() {
        let (op, executor) = deferred_operation();
        let log = Log::default();

        op.execute((false, recording(&log, "cb1")));
        op.execute((false, recording(&log, "cb2")));
        op.execute((false, recording(&log, "cb3")));

        assert_eq!(executor.calls(), 1);
        assert!(op.is_active());
        assert!(entries(&log).is_empty());

        let (succeed, _fail) = executor.take();
        assert!(succeed.complete(vec![Value::Int(42)]));

        assert_eq!(
            entries(&log),
            vec!["cb1:ok:[Int(42)]", "cb2:ok:[Int(42)]", "cb3:ok:[Int(42)]"]
        );
        assert!(!op.is_active());
        assert_eq!(executor.calls(), 1);
    }

    #[test]
    fn cached_outcome_is_served_synchronously() {
        let (op, executor) = deferred_operation();
        op.execute(());
        executor.take().0.complete(vec![Value::from("R")]);

        let log = Log::default();
        op.execute((false, recording(&log, "late")));

        assert_eq!(entries(&log), vec!["late:ok:[String(\"R\")]"]);
        assert_eq!(executor.calls(), 1);
        assert!(!op.is_active());
    }

    #[test]
    fn fresh_always_runs_again() {
        let (op, executor) = deferred_operation();
        op.execute(true);
        executor.take().0.complete(vec![]);
        op.execute(true);
        assert_eq!(executor.calls(), 2);
        assert!(op.is_active());
    }

    #[test]
    fn execute_without_handler_on_cache_hit_does_nothing() {
        let (op, executor) = deferred_operation();
        let log = Log::default();
        op.when(recording(&log, "sticky"));

        op.execute(());
        executor.take().0.complete(vec![Value::Int(1)]);
        op.execute(());

        assert_eq!(executor.calls(), 1);
        assert_eq!(entries(&log), vec!["sticky:ok:[Int(1)]"]);
    }

    #[test]
    fn once_handlers_fire_once_and_persistent_on_every_completion() {
        let (op, executor) = deferred_operation();
        let log = Log::default();
        op.when(recording(&log, "when"));
        op.once(recording(&log, "once"));

        op.execute(true);
        executor.take().0.complete(vec![Value::Int(1)]);
        op.execute(true);
        executor.take().0.complete(vec![Value::Int(2)]);

        assert_eq!(
            entries(&log),
            vec![
                "once:ok:[Int(1)]",
                "when:ok:[Int(1)]",
                "when:ok:[Int(2)]",
            ]
        );
    }

    #[test]
    fn once_queue_drains_before_persistent_in_registration_order() {
        let (op, executor) = deferred_operation();
        let log = Log::default();
        op.when(recording(&log, "w1"));
        op.once(recording(&log, "o1"));
        op.when(recording(&log, "w2"));
        op.execute(recording(&log, "o2"));

        executor.take().0.complete(vec![]);

        assert_eq!(
            entries(&log),
            vec!["o1:ok:[]", "o2:ok:[]", "w1:ok:[]", "w2:ok:[]"]
        );
    }

    #[test]
    fn failure_dispatches_to_failure_callbacks_and_is_cached() {
        let (op, executor) = deferred_operation();
        let log = Log::default();
        op.when(Handler::new(|_, _| anyhow::bail!("success callback must not run")));
        op.execute(recording(&log, "cb"));

        let (_succeed, fail) = executor.take();
        fail.complete(vec![Value::from("timeout")]);

        assert_eq!(entries(&log), vec!["cb:err:[String(\"timeout\")]"]);
        assert_eq!(
            op.cached(),
            Some(Outcome::failure(vec![Value::from("timeout")]))
        );

        // Cache hits replay the cached kind.
        op.execute(recording(&log, "hit"));
        assert_eq!(entries(&log).last().unwrap(), "hit:err:[String(\"timeout\")]");
        assert_eq!(executor.calls(), 1);
    }

    #[test]
    fn second_completion_is_ignored() {
        let (op, executor) = deferred_operation();
        let log = Log::default();
        op.when(recording(&log, "when"));
        op.execute(());

        let (succeed, fail) = executor.take();
        assert!(succeed.complete(vec![Value::Int(1)]));
        assert!(succeed.is_settled());
        assert!(!succeed.complete(vec![Value::Int(2)]));
        assert!(!fail.complete(vec![Value::Int(3)]));

        assert_eq!(entries(&log), vec!["when:ok:[Int(1)]"]);
        assert_eq!(op.cached(), Some(Outcome::success(vec![Value::Int(1)])));
    }

    #[test]
    fn failing_handlers_do_not_stop_fanout_and_are_reported() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let config = DeputizerConfig::merged(ConfigOverrides::new().on_operation_error(
            move |failure: &HandlerFailure| {
                sink.lock().push((failure.key.clone(), failure.cause.to_string()));
            },
        ));
        let executor = Arc::new(Deferred::default());
        let op = operation_with(executor.clone(), config);
        let log = Log::default();

        op.once(Handler::new(|_, _| anyhow::bail!("once failed")));
        op.once(recording(&log, "o2"));
        op.when(Handler::new(|_, _| panic!("when panicked")));
        op.when(recording(&log, "w2"));
        op.execute(());
        executor.take().0.complete(vec![]);

        assert_eq!(entries(&log), vec!["o2:ok:[]", "w2:ok:[]"]);
        let failures = failures.lock().clone();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0], ("op".to_string(), "once failed".to_string()));
        assert_eq!(failures[1].0, "op");
        assert!(failures[1].1.contains("when panicked"));
        assert!(!op.is_active());
    }

    #[test]
    fn handler_failures_without_hook_are_swallowed() {
        let (op, executor) = deferred_operation();
        let log = Log::default();
        op.once(Handler::new(|_, _| anyhow::bail!("ignored")));
        op.once(recording(&log, "after"));
        op.execute(());
        executor.take().0.complete(vec![]);
        assert_eq!(entries(&log), vec!["after:ok:[]"]);
        assert!(!op.is_active());
        assert_eq!(op.cached(), Some(Outcome::success(vec![])));
    }

    #[test]
    fn cached_failure_reaches_success_only_handler() {
        let (op, executor) = deferred_operation();
        op.execute(());
        executor.take().1.complete(vec![Value::from("offline")]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        op.execute(Handler::new(move |_, args| {
            sink.lock().push(args.to_vec());
            Ok(())
        }));

        assert_eq!(*seen.lock(), vec![vec![Value::from("offline")]]);
        assert_eq!(executor.calls(), 1);
    }

    #[test]
    fn cache_hit_handler_failures_are_reported() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let config = DeputizerConfig::merged(ConfigOverrides::new().on_operation_error(
            move |failure: &HandlerFailure| {
                sink.lock().push((failure.key.clone(), failure.cause.to_string()));
            },
        ));
        let executor = Arc::new(Deferred::default());
        let op = operation_with(executor.clone(), config);
        op.execute(());
        executor.take().0.complete(vec![Value::Int(1)]);

        let log = Log::default();
        op.execute(Handler::new(|_, _| anyhow::bail!("hit failed")))
            .execute(Handler::new(|_, _| panic!("hit panicked")))
            .execute(recording(&log, "after"));

        assert_eq!(entries(&log), vec!["after:ok:[Int(1)]"]);
        let failures = failures.lock().clone();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0], ("op".to_string(), "hit failed".to_string()));
        assert_eq!(failures[1].0, "op");
        assert!(failures[1].1.contains("hit panicked"));
        assert_eq!(executor.calls(), 1);
    }

    #[test]
    fn once_registered_during_fanout_waits_for_next_cycle() {
        let (op, executor) = deferred_operation();
        let log = Log::default();

        let reentrant = op.clone();
        let inner_log = log.clone();
        op.once(Handler::new(move |_, _| {
            reentrant.once(recording(&inner_log, "requeued"));
            Ok(())
        }));

        op.execute(());
        executor.take().0.complete(vec![Value::Int(1)]);
        assert!(entries(&log).is_empty());

        op.execute(true);
        executor.take().0.complete(vec![Value::Int(2)]);
        assert_eq!(entries(&log), vec!["requeued:ok:[Int(2)]"]);
    }

    #[test]
    fn handler_may_execute_from_within_fanout() {
        let (op, executor) = deferred_operation();
        let log = Log::default();

        let reentrant = op.clone();
        let inner_log = log.clone();
        op.once(Handler::new(move |_, _| {
            // Cache is already updated, so this is a synchronous hit.
            reentrant.execute(recording(&inner_log, "nested"));
            Ok(())
        }));

        op.execute(());
        executor.take().0.complete(vec![Value::Int(7)]);

        assert_eq!(entries(&log), vec!["nested:ok:[Int(7)]"]);
        assert_eq!(executor.calls(), 1);
    }

    #[test]
    fn fresh_execute_from_handler_starts_the_next_run() {
        let (op, executor) = deferred_operation();
        let log = Log::default();

        let reentrant = op.clone();
        let inner_log = log.clone();
        op.once(Handler::new(move |_, _| {
            reentrant.execute((true, recording(&inner_log, "nested")));
            Ok(())
        }));

        op.execute(());
        executor.take().0.complete(vec![Value::Int(1)]);
        assert!(entries(&log).is_empty());
        assert_eq!(executor.calls(), 2);
        assert!(op.is_active());

        executor.take().0.complete(vec![Value::Int(2)]);
        assert_eq!(entries(&log), vec!["nested:ok:[Int(2)]"]);
        assert!(!op.is_active());
    }

    #[test]
    fn uncached_execute_from_handler_is_served() {
        let executor = Arc::new(Deferred::default());
        let op = operation_with(
            executor.clone(),
            DeputizerConfig::merged(ConfigOverrides::new().cache(false)),
        );
        let log = Log::default();

        let reentrant = op.clone();
        let inner_log = log.clone();
        op.once(Handler::new(move |_, _| {
            reentrant.execute(recording(&inner_log, "nested"));
            Ok(())
        }));

        op.execute(());
        executor.take().0.complete(vec![]);
        executor.take().1.complete(vec![Value::from("no")]);

        assert_eq!(entries(&log), vec!["nested:err:[String(\"no\")]"]);
        assert_eq!(executor.calls(), 2);
        assert!(!op.is_active());
    }

    #[test]
    fn fresh_execute_racing_fanout_on_another_thread_is_served() {
        let (op, executor) = deferred_operation();
        let log = Log::default();

        // Holds the first fanout open until the racing call is queued.
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let first = Arc::new(AtomicBool::new(true));
        let (e, r, f) = (entered.clone(), release.clone(), first.clone());
        op.when(Handler::new(move |_, _| {
            if f.swap(false, Ordering::SeqCst) {
                e.wait();
                r.wait();
            }
            Ok(())
        }));

        op.execute(());
        let (succeed, _fail) = executor.take();
        let completing = std::thread::spawn(move || succeed.complete(vec![Value::Int(1)]));

        entered.wait();
        op.execute((true, recording(&log, "racer")));
        assert_eq!(executor.calls(), 1);
        release.wait();
        assert!(completing.join().unwrap());

        assert_eq!(executor.calls(), 2);
        assert!(op.is_active());
        executor.take().0.complete(vec![Value::Int(2)]);
        assert_eq!(entries(&log), vec!["racer:ok:[Int(2)]"]);
        assert!(!op.is_active());
    }

    #[test]
    fn synchronous_executor_completes_inside_execute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let op = Operation::new(
            "sum",
            Arc::new(move |ctx: &Value, succeed: Completer, _fail: Completer| {
                counter.fetch_add(1, Ordering::SeqCst);
                let a = ctx.get("a").cloned().unwrap_or_default();
                let b = ctx.get("b").cloned().unwrap_or_default();
                succeed.complete(vec![a, b]);
            }),
            Some(Value::from(serde_json::json!({"a": 1, "b": 2}))),
            Arc::new(DeputizerConfig::default()),
        );
        let log = Log::default();
        op.execute(recording(&log, "cb"));

        assert_eq!(entries(&log), vec!["cb:ok:[Int(1), Int(2)]"]);
        assert!(!op.is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_disabled_runs_on_every_call() {
        let executor = Arc::new(Deferred::default());
        let op = operation_with(
            executor.clone(),
            DeputizerConfig::merged(ConfigOverrides::new().cache(false)),
        );
        op.execute(());
        executor.take().0.complete(vec![]);
        op.execute(());
        assert_eq!(executor.calls(), 2);

        // An explicit flag still wins.
        executor.take().0.complete(vec![]);
        op.execute(false);
        assert_eq!(executor.calls(), 2);
    }

    #[test]
    fn handlers_receive_their_own_or_default_context() {
        let executor = Arc::new(Deferred::default());
        let op = operation_with(
            executor.clone(),
            DeputizerConfig {
                default_context: Value::from("default"),
                ..DeputizerConfig::default()
            },
        );
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        op.when(Handler::new(move |ctx, _| {
            sink.lock().push(ctx.clone());
            Ok(())
        }));
        let sink = seen.clone();
        op.once(
            Handler::new(move |ctx, _| {
                sink.lock().push(ctx.clone());
                Ok(())
            })
            .with_context(Value::from("own")),
        );

        assert_eq!(op.context(), &Value::from("default"));
        op.execute(());
        executor.take().0.complete(vec![]);

        assert_eq!(
            *seen.lock(),
            vec![Value::from("own"), Value::from("default")]
        );
    }

    #[test]
    fn completion_from_another_thread() {
        let (op, executor) = deferred_operation();
        let log = Log::default();
        op.execute(recording(&log, "cb"));

        let (succeed, _fail) = executor.take();
        std::thread::spawn(move || succeed.complete(vec![Value::Bool(true)]))
            .join()
            .unwrap();

        assert_eq!(entries(&log), vec!["cb:ok:[Bool(true)]"]);
        assert!(!op.is_active());
    }
}
