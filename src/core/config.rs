//! # Registry configuration.
//!
//! Provides [`RegistryConfig`], the centralized settings for one
//! registry's scheduler loop.
//!
//! ## Sentinel values
//! - `stop_grace = 0s` → no bound on a service `stop()` during the quit
//!   cascade (wait forever)
//! - `start_timeout = 0s` → no bound on a service `start()`

use std::time::Duration;

/// Configuration for one registry.
///
/// ## Field semantics
/// - `stop_grace`: per-service bound on `stop()` during the quit cascade;
///   a service exceeding it goes to `Unknown` and is reported as stuck
///   (`0s` = wait forever)
/// - `start_timeout`: per-service bound on `start()` (`0s` = no bound);
///   a timed-out start counts as a start failure, leaving the service
///   `Installed`
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Maximum time one service may spend in `stop()` during the final
    /// quit cascade before it is abandoned in `Unknown`.
    pub stop_grace: Duration,

    /// Maximum time one service may spend in `start()`.
    pub start_timeout: Duration,
}

impl RegistryConfig {
    /// Returns the stop grace as an `Option` (`None` = wait forever).
    #[inline]
    pub fn stop_grace_bound(&self) -> Option<Duration> {
        if self.stop_grace == Duration::ZERO {
            None
        } else {
            Some(self.stop_grace)
        }
    }

    /// Returns the start timeout as an `Option` (`None` = no bound).
    #[inline]
    pub fn start_timeout_bound(&self) -> Option<Duration> {
        if self.start_timeout == Duration::ZERO {
            None
        } else {
            Some(self.start_timeout)
        }
    }
}

impl Default for RegistryConfig {
    /// Default configuration:
    ///
    /// - `stop_grace = 30s` (reasonable shutdown window)
    /// - `start_timeout = 0s` (no bound)
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(30),
            start_timeout: Duration::from_secs(0),
        }
    }
}
