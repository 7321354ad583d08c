//! # Event sink - the cross-thread intake of one registry.
//!
//! [`EventSink`] is a thin wrapper around an unbounded
//! [`tokio::sync::mpsc`] sender. It is the **only** surface through which
//! code outside a registry's loop (detached workers, other threads, the
//! cross-registry channel) feeds events into that registry.
//!
//! ## Rules
//! - **Non-blocking push**: `push()` never blocks or awaits; it is a
//!   plain unbounded enqueue.
//! - **No direct state access**: a sink carries no reference to the
//!   registry's service table or graph; those are mutated only by the
//!   loop that owns them.
//! - **Cloneable**: cheap to clone (internally an `Arc`-backed sender).

use tokio::sync::mpsc;

use super::event::Event;

/// Identifier of one registry within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryId(pub(crate) u64);

/// Clonable, non-blocking event intake for one registry.
#[derive(Clone, Debug)]
pub struct EventSink {
    registry: RegistryId,
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub(crate) fn new(registry: RegistryId, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { registry, tx }
    }

    /// The registry this sink feeds.
    pub fn registry(&self) -> RegistryId {
        self.registry
    }

    /// Enqueues an event into the owning registry's queue.
    ///
    /// Never blocks. If the registry loop has already terminated and the
    /// receiver is gone, the event is dropped.
    pub fn push(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::debug!(registry = self.registry.0, "event dropped: intake closed");
        }
    }
}
