//! Awaitable fetches.
//!
//! Bridges the callback API to `async`: the request registers a one-shot
//! handler pair forwarding the outcome through a `tokio::sync::oneshot`
//! channel, then awaits it. Cache hits resolve without waiting.

use std::sync::Arc;
use std::time::Duration;

use deputizer_core::{DeputizerError, ExecuteOptions, Handler, Outcome, Registry};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Errors returned by [`fetch`] and [`fetch_timeout`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Registry(#[from] DeputizerError),
    #[error("operation was dropped before it completed")]
    Dropped,
    #[error("fetch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

type Slot = Arc<Mutex<Option<oneshot::Sender<Outcome>>>>;

fn forward(slot: &Slot, outcome: Outcome) {
    if let Some(tx) = slot.lock().take() {
        // Receiver gone means the caller stopped waiting.
        let _ = tx.send(outcome);
    }
}

fn request(
    registry: &Registry,
    key: &str,
    fresh: Option<bool>,
) -> Result<oneshot::Receiver<Outcome>, FetchError> {
    let (tx, rx) = oneshot::channel();
    let slot: Slot = Arc::new(Mutex::new(Some(tx)));
    let on_failure = slot.clone();

    let handler = Handler::new(move |_, args| {
        forward(&slot, Outcome::success(args.to_vec()));
        Ok(())
    })
    .with_failure(move |_, args| {
        forward(&on_failure, Outcome::failure(args.to_vec()));
        Ok(())
    });

    registry.execute(
        key,
        ExecuteOptions {
            fresh,
            handler: Some(handler),
        },
    )?;
    Ok(rx)
}

/// Requests `key` and waits for its outcome.
///
/// `fresh: None` defers to the registry's default freshness. A failure
/// outcome is returned as `Ok` with [`deputizer_core::OutcomeKind::Failure`];
/// only registry errors and abandoned runs are `Err`.
///
/// # Errors
///
/// `FetchError::Registry` if the key is malformed or undefined,
/// `FetchError::Dropped` if the operation was discarded before completing.
pub async fn fetch(
    registry: &Registry,
    key: &str,
    fresh: Option<bool>,
) -> Result<Outcome, FetchError> {
    let rx = request(registry, key, fresh)?;
    rx.await.map_err(|_| FetchError::Dropped)
}

/// Same as [`fetch`], giving up after `timeout`.
///
/// Giving up does not cancel the run: it still completes and fans out to
/// every other handler.
///
/// # Errors
///
/// As [`fetch`], plus `FetchError::Timeout` when the deadline elapses.
pub async fn fetch_timeout(
    registry: &Registry,
    key: &str,
    fresh: Option<bool>,
    timeout: Duration,
) -> Result<Outcome, FetchError> {
    let rx = request(registry, key, fresh)?;
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(_)) => Err(FetchError::Dropped),
        Err(_) => Err(FetchError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
