//! Deputizer Core — per-key execution coalescing, result caching, and
//! callback fanout for named asynchronous operations.
//!
//! A [`Registry`] maps keys to [`Operation`]s. Requesting an operation's
//! result either serves the cached outcome, joins the run already in flight,
//! or starts a new run; the eventual outcome is fanned out to one-shot and
//! persistent [`Handler`]s.

pub mod config;
pub mod error;
pub mod handler;
pub mod operation;
pub mod registry;
pub mod types;

pub use config::{ConfigOverrides, DeputizerConfig, ErrorHook};
pub use error::{DeputizerError, HandlerFailure, Result};
pub use handler::{ExecuteOptions, Handler, HandlerFn};
pub use operation::{Completer, Executor, Operation};
pub use registry::Registry;
pub use types::{Outcome, OutcomeKind, Value};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
