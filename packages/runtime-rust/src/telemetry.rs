//! Tracing setup for applications embedding the deputizer.
//!
//! The core crate only emits `tracing` events; these helpers install a
//! subscriber that prints them.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "DEPUTIZER_LOG";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs a human-readable subscriber filtered by `DEPUTIZER_LOG`
/// (default `info`).
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

/// Same as [`init_tracing`], emitting one JSON object per event.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_json_tracing() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()?;
    Ok(())
}
