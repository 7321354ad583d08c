//! # Registry channel - event fan-out across registries.
//!
//! A [`RegistryChannel`] holds one [`EventSink`] per participating
//! registry; broadcasting clones the event into every registered sink.
//! This is the only cross-thread communication primitive: registries on
//! different threads never share direct references, they exchange
//! events.
//!
//! ## Rules
//! - `broadcast()` never blocks: sinks are unbounded enqueues, and a
//!   terminated registry's sink silently drops.
//! - The channel is `Send + Sync`; share it behind an `Arc` between the
//!   threads hosting the registries.
//! - Delivery is per-registry ordered (one intake per registry), with no
//!   global ordering across registries beyond the event `seq`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::ServiceRegistry;
use crate::events::{Event, EventSink, RegistryId};

/// Broadcast channel delivering events to a set of registries.
#[derive(Default)]
pub struct RegistryChannel {
    sinks: Mutex<HashMap<RegistryId, EventSink>>,
}

impl RegistryChannel {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registry to the broadcast set.
    pub fn add_registry(&self, registry: &ServiceRegistry) {
        self.add_sink(registry.sink());
    }

    /// Adds a sink to the broadcast set (keyed by its registry id).
    pub fn add_sink(&self, sink: EventSink) {
        self.lock_sinks().insert(sink.registry(), sink);
    }

    /// Removes a registry from the broadcast set.
    pub fn remove_registry(&self, id: RegistryId) {
        self.lock_sinks().remove(&id);
    }

    /// Enqueues a copy of the event into every registered registry.
    /// Never blocks.
    pub fn broadcast(&self, event: Event) {
        let sinks = self.lock_sinks();
        for sink in sinks.values() {
            sink.push(event.clone());
        }
    }

    /// Number of registered registries.
    pub fn len(&self) -> usize {
        self.lock_sinks().len()
    }

    /// True when no registry is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_sinks(&self) -> std::sync::MutexGuard<'_, HashMap<RegistryId, EventSink>> {
        // A panic while holding the lock leaves the map intact; keep
        // broadcasting.
        match self.sinks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
