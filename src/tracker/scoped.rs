//! # ScopedTracker - per-scope factory with consumer refcounting.
//!
//! The common tracker shape: one instance per distinct scope value,
//! created from a factory closure on first demand and destroyed when the
//! last consumer for that scope withdraws.
//!
//! ```text
//! demand(scope="eu")  ──► no instance ──► create(factory("eu")), consumers=1
//! demand(scope="eu")  ──► live         ──► consumers=2  (idempotent)
//! undo(scope="eu")    ──► consumers=1
//! undo(scope="eu")    ──► consumers=0  ──► uninstall instance
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{ServiceId, ServiceRegistry, ServiceSpec};
use crate::error::ServiceError;

use super::tracker::{Demand, DependencyTracker};

struct ScopeEntry {
    service: ServiceId,
    consumers: usize,
}

/// Creates one service instance per scope value, on demand.
///
/// The factory receives the scope and returns the spec to install; it
/// usually seeds the instance's properties with the scope so the
/// instance can configure itself.
pub struct ScopedTracker {
    factory: Arc<dyn Fn(&str) -> ServiceSpec + Send + Sync>,
    live: HashMap<Arc<str>, ScopeEntry>,
}

impl ScopedTracker {
    /// Creates a tracker from a per-scope spec factory.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str) -> ServiceSpec + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            live: HashMap::new(),
        }
    }

    /// Number of live scoped instances.
    pub fn live_scopes(&self) -> usize {
        self.live.len()
    }
}

#[async_trait]
impl DependencyTracker for ScopedTracker {
    async fn on_request(
        &mut self,
        demand: &Demand,
        registry: &mut ServiceRegistry,
    ) -> Result<(), ServiceError> {
        let scope = demand.scope_or_default();
        if let Some(entry) = self.live.get_mut(&scope) {
            entry.consumers += 1;
            return Ok(());
        }
        let spec = (self.factory)(&scope);
        let service = registry.create(spec);
        tracing::debug!(scope = scope.as_ref(), %service, "scoped instance created");
        self.live.insert(
            scope,
            ScopeEntry {
                service,
                consumers: 1,
            },
        );
        Ok(())
    }

    async fn on_undo(
        &mut self,
        demand: &Demand,
        registry: &mut ServiceRegistry,
    ) -> Result<(), ServiceError> {
        let scope = demand.scope_or_default();
        let Some(entry) = self.live.get_mut(&scope) else {
            return Ok(());
        };
        entry.consumers = entry.consumers.saturating_sub(1);
        if entry.consumers == 0 {
            let service = entry.service;
            self.live.remove(&scope);
            tracing::debug!(scope = scope.as_ref(), %service, "scoped instance destroyed");
            registry.uninstall(service).await;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ScopedTracker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Service, ServiceContext};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Service for Noop {
        async fn start(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn stop(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn demand_for(scope: &str) -> Demand {
        Demand {
            iface: crate::core::InterfaceKey::of::<Noop>(),
            scope: Some(Arc::from(scope)),
            requester: ServiceId::NONE,
        }
    }

    #[tokio::test]
    async fn one_instance_per_scope() {
        let mut registry = ServiceRegistry::new(Default::default());
        let mut tracker =
            ScopedTracker::new(|scope| ServiceSpec::new(format!("noop-{scope}"), |_| Box::new(Noop)));

        tracker
            .on_request(&demand_for("a"), &mut registry)
            .await
            .unwrap();
        tracker
            .on_request(&demand_for("a"), &mut registry)
            .await
            .unwrap();
        tracker
            .on_request(&demand_for("b"), &mut registry)
            .await
            .unwrap();
        assert_eq!(tracker.live_scopes(), 2);

        tracker
            .on_undo(&demand_for("a"), &mut registry)
            .await
            .unwrap();
        assert_eq!(tracker.live_scopes(), 2);
        tracker
            .on_undo(&demand_for("a"), &mut registry)
            .await
            .unwrap();
        assert_eq!(tracker.live_scopes(), 1);
    }
}
