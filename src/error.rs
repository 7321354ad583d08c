//! Error types used by the compvisor runtime and services.
//!
//! This module defines three error enums:
//!
//! - [`RuntimeError`]: errors raised by a registry's run loop itself.
//! - [`ServiceError`]: errors raised by individual services and handlers.
//! - [`PropertyError`]: typed property-bag read failures.
//!
//! All types provide helper methods (`as_label`, `as_message`) for
//! logging/metrics. A [`PropertyError`] converts into
//! [`ServiceError::Config`], so a service `start()` can read properties
//! with `?` and surface a missing/mistyped key as a start failure rather
//! than a crash.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by a registry run loop.
///
/// These represent failures in the orchestration runtime itself, such as
/// a quit cascade exceeding its grace period.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Stop grace period was exceeded during the quit cascade; some
    /// services could not be stopped in time and were left in `Unknown`.
    #[error("stop grace {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of services that did not stop in time.
        stuck: Vec<String>,
    },

    /// The registry intake channel closed while the loop was still running.
    ///
    /// This can only happen if every [`EventSink`](crate::EventSink) clone
    /// (including the registry's own) was dropped.
    #[error("event intake closed")]
    IntakeClosed,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::IntakeClosed => "runtime_intake_closed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck services={stuck:?}")
            }
            RuntimeError::IntakeClosed => "event intake closed".to_string(),
        }
    }
}

/// # Errors produced by services and event handlers.
///
/// These represent failures of individual components managed by the
/// runtime. `Config` and `Failed` leave the service recoverable
/// (re-startable); `Fatal` forces it out of `Active` permanently.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A required property was missing or had the wrong type.
    ///
    /// Returned from `start()` this leaves the service `Installed`;
    /// it is retried only when something re-requests a start.
    #[error("configuration error: {0}")]
    Config(#[from] PropertyError),

    /// Recoverable failure; the service may be started again.
    #[error("execution failed: {error}")]
    Failed {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable fatal error (the service must not be restarted
    /// automatically).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// A lifecycle transition exceeded its allotted time.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// The operation was cancelled by runtime shutdown.
    #[error("cancelled by shutdown")]
    Canceled,
}

impl ServiceError {
    /// Shorthand constructor for [`ServiceError::Failed`].
    pub fn failed(error: impl Into<String>) -> Self {
        ServiceError::Failed {
            error: error.into(),
        }
    }

    /// Shorthand constructor for [`ServiceError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        ServiceError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Config(_) => "service_config",
            ServiceError::Failed { .. } => "service_failed",
            ServiceError::Fatal { .. } => "service_fatal",
            ServiceError::Timeout { .. } => "service_timeout",
            ServiceError::Canceled => "service_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ServiceError::Config(e) => format!("config: {e}"),
            ServiceError::Failed { error } => format!("error: {error}"),
            ServiceError::Fatal { error } => format!("fatal: {error}"),
            ServiceError::Timeout { timeout } => format!("timeout: {timeout:?}"),
            ServiceError::Canceled => "cancelled by shutdown".to_string(),
        }
    }

    /// Indicates whether this error forces the originating service out of
    /// `Active` permanently (no automatic restart).
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Fatal { .. })
    }
}

/// # Typed property-bag read failures.
///
/// Callers treat these as fatal configuration errors for the owning
/// service's `start()` unless documented otherwise.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    /// The requested key is not present in the bag.
    #[error("missing property key {key:?}")]
    MissingKey {
        /// The key that was looked up.
        key: String,
    },

    /// The key exists but holds a value of a different type.
    #[error("property {key:?} is {found}, expected {expected}")]
    TypeMismatch {
        /// The key that was looked up.
        key: String,
        /// The expected type name (e.g. `"str"`).
        expected: &'static str,
        /// The type name actually stored.
        found: &'static str,
    },
}

impl PropertyError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PropertyError::MissingKey { .. } => "property_missing_key",
            PropertyError::TypeMismatch { .. } => "property_type_mismatch",
        }
    }
}
