//! # Event handler traits and registrations.
//!
//! Provides [`EventHandler`], the extension point for plugging event
//! processing into a registry's scheduler, plus the registration plumbing
//! around it (targets, one-shot flags, drop-guards, completion and error
//! callbacks).
//!
//! ## Dispatch contract
//! Handlers run **sequentially on the owning registry's loop**, in
//! registration order. The returned [`HandlerFlow`] communicates two
//! things at once:
//! - whether the handler fully processed the event or wants to **yield**
//!   and be re-invoked on a later pass with the same event, and
//! - whether remaining handlers for this event should still run
//!   (**stop propagation**).
//!
//! ```text
//!                continue propagation   stop propagation
//! processed      HandlerFlow::Continue  HandlerFlow::Consume
//! will resume    HandlerFlow::Yield     HandlerFlow::YieldConsume
//! ```
//!
//! Yielding implements cooperative, non-blocking long-running handlers:
//! the scheduler re-queues the continuation at the back of the event's
//! priority band, so equally-suspended handlers keep their relative order.
//!
//! ## Rules
//! - A registration is released when its [`Registration`] guard is
//!   dropped, or when the subscriber service stops, whichever comes first.
//! - A pending suspended handler whose owning service has stopped is
//!   never resumed; the scheduler drops its continuation.
//! - Errors returned by a handler are routed to the event kind's error
//!   callback if one is registered, and are otherwise traced and dropped.
//!   A handler error never aborts the loop.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::ServiceId;
use crate::error::ServiceError;

use super::event::{Event, EventKind};
use super::sink::EventSink;

/// Outcome of one handler invocation.
///
/// Encodes the (processed | will-resume) × (continue | stop propagation)
/// matrix; see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerFlow {
    /// Fully processed; let remaining handlers run.
    Continue,
    /// Fully processed; do not run remaining handlers for this event.
    Consume,
    /// Partially processed; re-invoke later, let remaining handlers run.
    Yield,
    /// Partially processed; re-invoke later, do not run remaining handlers.
    YieldConsume,
}

impl HandlerFlow {
    /// True if the handler wants to be re-invoked with the same event.
    pub fn is_yield(&self) -> bool {
        matches!(self, HandlerFlow::Yield | HandlerFlow::YieldConsume)
    }

    /// True if remaining handlers for this event must be skipped.
    pub fn stops_propagation(&self) -> bool {
        matches!(self, HandlerFlow::Consume | HandlerFlow::YieldConsume)
    }
}

/// Context handed to a handler invocation.
///
/// The only way out of a handler is the event surface: push further
/// events (including control events such as tracker demand or a stop
/// request) through [`HandlerContext::push`].
pub struct HandlerContext {
    sink: EventSink,
    subscriber: ServiceId,
}

impl HandlerContext {
    pub(crate) fn new(sink: EventSink, subscriber: ServiceId) -> Self {
        Self { sink, subscriber }
    }

    /// The service that owns this registration.
    pub fn subscriber(&self) -> ServiceId {
        self.subscriber
    }

    /// Pushes an event into the owning registry's queue.
    ///
    /// If the event has no origin yet, the subscriber is filled in.
    pub fn push(&self, mut event: Event) {
        if event.origin == ServiceId::NONE {
            event = event.with_origin(self.subscriber);
        }
        self.sink.push(event);
    }

    /// Returns a clonable sink for detached workers.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }
}

/// Event handler invoked by the scheduler for matching events.
///
/// Handlers are shared (`Arc`) and invoked with `&self`; keep mutable
/// state behind interior mutability. Because handlers for one registry
/// run sequentially on that registry's loop, a `std::sync::Mutex` is
/// never contended from within the same registry.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Processes (or partially processes) a single event.
    async fn on_event(
        &self,
        event: &Event,
        ctx: &HandlerContext,
    ) -> Result<HandlerFlow, ServiceError>;

    /// Returns the handler name used in diagnostics.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose;
    /// override it when possible.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Which publishers a registration listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    /// Events of the kind from any origin.
    All,
    /// Only events published by this service.
    Service(ServiceId),
}

impl EventTarget {
    pub(crate) fn matches(&self, event: &Event) -> bool {
        match self {
            EventTarget::All => true,
            EventTarget::Service(id) => event.origin == *id,
        }
    }
}

/// Identifier of one handler registration within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub(crate) u64);

/// One handler registration record (owned by the registry).
pub(crate) struct HandlerRegistration {
    pub(crate) kind: EventKind,
    pub(crate) subscriber: ServiceId,
    pub(crate) target: EventTarget,
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) once: bool,
}

impl HandlerRegistration {
    pub(crate) fn matches(&self, event: &Event) -> bool {
        self.kind == event.kind && self.target.matches(event)
    }
}

/// Drop-guard for a handler registration.
///
/// Dropping the guard pushes a control event that releases the
/// registration; this is safe to do from the registering service's own
/// `stop()` (it is a plain enqueue). [`Registration::release`] does the
/// same thing eagerly.
#[must_use = "dropping the guard releases the registration"]
pub struct Registration {
    id: Option<RegistrationId>,
    sink: EventSink,
}

impl Registration {
    pub(crate) fn new(id: RegistrationId, sink: EventSink) -> Self {
        Self { id: Some(id), sink }
    }

    /// The registration's identifier.
    pub fn id(&self) -> RegistrationId {
        // `id` is only None after release(), which consumes self.
        self.id.expect("registration already released")
    }

    /// Releases the registration now.
    pub fn release(mut self) {
        self.push_deregister();
    }

    fn push_deregister(&mut self) {
        if let Some(id) = self.id.take() {
            self.sink
                .push(Event::new(EventKind::Deregister).with_payload(Arc::new(id)));
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.push_deregister();
    }
}

/// One-shot notification fired once a specific event instance has
/// finished all dispatch (including every suspended handler's final
/// resume). Useful for request/response patterns layered on the bus.
pub trait CompletionCallback: Send + 'static {
    /// Invoked exactly once with the completed event.
    fn on_complete(self: Box<Self>, event: &Event);
}

impl<F> CompletionCallback for F
where
    F: FnOnce(&Event) + Send + 'static,
{
    fn on_complete(self: Box<Self>, event: &Event) {
        (*self)(event)
    }
}

/// Companion error callback for one event kind.
///
/// Receives the event and the error a handler returned for it.
pub type ErrorCallback = Arc<dyn Fn(&Event, &ServiceError) + Send + Sync>;
