//! # Tracker trait and demand records.
//!
//! The scheduler routes [`EventKind::DependencyRequest`] and
//! [`EventKind::DependencyUndoRequest`](crate::EventKind) control events
//! to every tracker registered for the demanded interface; the tracker
//! runs **on the registry's loop** with mutable access to the registry,
//! so it can install or uninstall services directly.
//!
//! ## Rules
//! - Demand is emitted at most once per (requester, interface); the undo
//!   fires when the requester is uninstalled. Trackers refcount consumers
//!   per scope, so repeated demand for a live scope is answered without
//!   creating a second instance.
//! - A tracker error is traced and dropped; it never aborts the loop.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{InterfaceKey, ServiceId, ServiceRegistry};
use crate::error::ServiceError;

/// One observed unit of demand for an interface.
#[derive(Clone, Debug)]
pub struct Demand {
    /// The interface a service requires.
    pub iface: InterfaceKey,
    /// Scope value partitioning instances (from the requester's
    /// properties, via the tracker registration's scope key).
    pub scope: Option<Arc<str>>,
    /// The requesting service.
    pub requester: ServiceId,
}

impl Demand {
    /// The scope value, with the empty string standing in for unscoped
    /// demand.
    pub fn scope_or_default(&self) -> Arc<str> {
        self.scope.clone().unwrap_or_else(|| Arc::from(""))
    }
}

/// Observer of unmet (and withdrawn) demand for one interface.
///
/// Registered via
/// [`ServiceRegistry::register_tracker`](crate::ServiceRegistry::register_tracker);
/// invoked sequentially on the owning registry's loop.
#[async_trait]
pub trait DependencyTracker: Send + 'static {
    /// A service demands the interface; typically creates a matching
    /// instance via [`ServiceRegistry::create`] unless one already
    /// serves the demand's scope.
    async fn on_request(
        &mut self,
        demand: &Demand,
        registry: &mut ServiceRegistry,
    ) -> Result<(), ServiceError>;

    /// The demand was withdrawn (requester uninstalled); typically
    /// destroys the scoped instance once its last consumer is gone.
    async fn on_undo(
        &mut self,
        demand: &Demand,
        registry: &mut ServiceRegistry,
    ) -> Result<(), ServiceError>;

    /// Returns the tracker name used in diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
