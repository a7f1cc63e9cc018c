//! Error types for the deputizer.
//!
//! [`DeputizerError`] covers failures raised synchronously at an API call
//! site. [`HandlerFailure`] is the record produced when a registered handler
//! fails during fanout; it is never returned to a caller, only delivered to
//! the configured error hook.

/// Result type for registry and configuration calls.
pub type Result<T> = std::result::Result<T, DeputizerError>;

/// Errors raised synchronously by registry, operation and configuration calls.
///
/// Every variant names the `origin`, the API entry point that rejected the
/// call (e.g. `"Registry::when"`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeputizerError {
    /// A malformed key or configuration was supplied.
    #[error("{origin}: {message}")]
    InvalidArgument {
        origin: &'static str,
        message: String,
    },

    /// The requested operation is not defined in this registry.
    #[error("{origin}: no definition for the key {key:?}")]
    UnknownKey { origin: &'static str, key: String },

    /// Attempt to redefine an operation while it is in flight.
    #[error("Registry::define: {key:?} is active and cannot be replaced")]
    Conflict { key: String },
}

impl DeputizerError {
    pub(crate) fn invalid_argument(origin: &'static str, message: impl Into<String>) -> Self {
        DeputizerError::InvalidArgument {
            origin,
            message: message.into(),
        }
    }

    /// Returns true if this is an "invalid argument" error.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, DeputizerError::InvalidArgument { .. })
    }

    /// Returns true if this is an "unknown key" error.
    #[must_use]
    pub fn is_unknown_key(&self) -> bool {
        matches!(self, DeputizerError::UnknownKey { .. })
    }

    /// Returns true if this is a "conflict" error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, DeputizerError::Conflict { .. })
    }
}

/// A registered handler failed (returned `Err` or panicked) while an
/// outcome was being delivered to it.
///
/// Delivered to the configured `on_operation_error` hook. The failure never
/// aborts delivery to the remaining handlers.
#[derive(Debug, thiserror::Error)]
#[error("{origin}: {message}")]
pub struct HandlerFailure {
    /// Where the failure happened, e.g. `handler for "user"`.
    pub origin: String,
    /// Key of the operation whose handler failed.
    pub key: String,
    /// Human-readable summary.
    pub message: String,
    /// The error returned by the handler, or the panic payload.
    #[source]
    pub cause: anyhow::Error,
}

impl HandlerFailure {
    pub(crate) fn new(key: &str, cause: anyhow::Error) -> Self {
        Self {
            origin: format!("handler for {key:?}"),
            key: key.to_string(),
            message: "error occurred while a handler was being executed".to_string(),
            cause,
        }
    }
}
