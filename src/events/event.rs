//! # Runtime events: classification, priorities, and payload metadata.
//!
//! The [`EventKind`] enum classifies events across three categories:
//! - **Control events**: runtime steering (quit, start/stop requests,
//!   error escalation, tracker demand). These occupy a reserved
//!   high-priority band so they are dispatched before application events.
//! - **Lifecycle notifications**: observability stream for service state
//!   transitions (installed, started, stopped, failed, uninstalled).
//! - **Application events**: [`EventKind::Custom`] kinds defined by
//!   services, with an optional type-erased payload.
//!
//! ## Ordering guarantees
//! Each event carries a globally unique sequence number (`seq`) that
//! increases monotonically across all registries. Within one registry the
//! queue dispatches by `(priority, enqueue order)`: a lower priority value
//! is dispatched sooner, and events of equal priority are FIFO.
//!
//! ## Priority bands
//! ```text
//! 0  ..= 15   control band (reserved for the runtime)
//! 16 ..= 271  application band (caller value + 16)
//! ```
//! [`Event::with_priority`] offsets application priorities past the
//! reserved control band, so every pair of distinct caller values stays
//! distinct after banding (1 still dispatches before 5). Control kinds
//! default to [`PRIORITY_CONTROL`].
//!
//! ## Example
//! ```rust
//! use compvisor::{Event, EventKind, ServiceId, PRIORITY_HIGH, PRIORITY_LOW};
//!
//! let urgent = Event::new(EventKind::Custom("frame-decoded"))
//!     .with_origin(ServiceId::NONE)
//!     .with_priority(PRIORITY_HIGH)
//!     .with_reason("keyframe");
//! let background = Event::new(EventKind::Custom("frame-decoded"))
//!     .with_priority(PRIORITY_LOW);
//!
//! assert_eq!(urgent.kind, EventKind::Custom("frame-decoded"));
//! assert!(urgent.priority < background.priority);
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::core::{InterfaceKey, ServiceId};

/// Global sequence counter for event ordering (shared by all registries).
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Highest effective priority value inside the reserved control band.
pub const CONTROL_BAND_MAX: u16 = 15;
/// Priority used by runtime control events (quit, stop requests, errors).
pub const PRIORITY_CONTROL: u16 = 0;
/// High application priority (dispatched before normal traffic).
pub const PRIORITY_HIGH: u8 = 64;
/// Default application priority.
pub const PRIORITY_NORMAL: u8 = 128;
/// Low application priority (background work).
pub const PRIORITY_LOW: u8 = 192;

/// Type-erased event payload shared between handlers.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Control events (reserved priority band) ===
    /// Drain already-enqueued events, stop every `Active` service in
    /// reverse-dependency order, then return from `Registry::start`.
    ///
    /// Sets: `at`, `seq` (optionally `reason`).
    Quit,

    /// Request to (re-)start an installed service.
    ///
    /// Clears a circular-dependency block and re-runs the satisfaction
    /// pass. Used for retry-after-failure patterns.
    ///
    /// Sets: `service` (by id) or `name` (by service name).
    StartService,

    /// Request to stop one service (dependents are stopped first).
    ///
    /// Sets: `service`.
    StopService,

    /// Recoverable runtime error: logged to the event stream, the
    /// originating service keeps running.
    ///
    /// Sets: `origin`, `reason`.
    RecoverableError,

    /// Unrecoverable runtime error: the originating service is forced
    /// out of `Active` into the terminal `Unknown` state. Ignored for
    /// services that are not `Active` when the event is dispatched.
    ///
    /// Sets: `origin`, `reason`.
    UnrecoverableError,

    /// Demand for an interface instance, routed to dependency trackers.
    ///
    /// Sets: `iface`, `scope` (from the requester's properties),
    /// `service` (the requester).
    DependencyRequest,

    /// The last consumer for a scope relinquished interest; routed to
    /// dependency trackers so they can destroy the scoped instance.
    ///
    /// Sets: `iface`, `scope`, `service` (the departing requester).
    DependencyUndoRequest,

    /// Releases a handler registration (pushed by the registration
    /// guard's `Drop`).
    ///
    /// Sets: `payload` (the registration id).
    Deregister,

    // === Lifecycle notifications ===
    /// A service entity was recorded in the registry (`Installed`).
    ///
    /// Sets: `service`, `name`.
    ServiceInstalled,

    /// A service reached `Active` (all required dependencies were
    /// `Active` and `start()` succeeded).
    ///
    /// Sets: `service`, `name`.
    ServiceStarted,

    /// A service left `Active` and returned to `Installed`.
    ///
    /// Sets: `service`, `name`.
    ServiceStopped,

    /// A lifecycle transition failed (`start()` error, `stop()` error,
    /// circular dependency, fatal runtime error).
    ///
    /// Sets: `service`, `name`, `reason`.
    ServiceFailed,

    /// A service entity was destroyed (`Uninstalled`, terminal).
    ///
    /// Sets: `service`, `name`.
    ServiceUninstalled,

    // === Application events ===
    /// Application-defined event kind. The static string is the kind's
    /// stable identity for handler registration.
    Custom(&'static str),
}

impl EventKind {
    /// Returns true for kinds in the reserved control band.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            EventKind::Quit
                | EventKind::StartService
                | EventKind::StopService
                | EventKind::RecoverableError
                | EventKind::UnrecoverableError
                | EventKind::DependencyRequest
                | EventKind::DependencyUndoRequest
                | EventKind::Deregister
        )
    }

    /// Returns the default effective dispatch priority for this kind.
    pub fn default_priority(&self) -> u16 {
        if self.is_control() {
            PRIORITY_CONTROL
        } else {
            PRIORITY_NORMAL as u16 + CONTROL_BAND_MAX + 1
        }
    }

    /// Returns a short stable label (kebab-case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::Quit => "quit",
            EventKind::StartService => "start-service",
            EventKind::StopService => "stop-service",
            EventKind::RecoverableError => "recoverable-error",
            EventKind::UnrecoverableError => "unrecoverable-error",
            EventKind::DependencyRequest => "dependency-request",
            EventKind::DependencyUndoRequest => "dependency-undo-request",
            EventKind::Deregister => "deregister",
            EventKind::ServiceInstalled => "service-installed",
            EventKind::ServiceStarted => "service-started",
            EventKind::ServiceStopped => "service-stopped",
            EventKind::ServiceFailed => "service-failed",
            EventKind::ServiceUninstalled => "service-uninstalled",
            EventKind::Custom(name) => name,
        }
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - `priority`: dispatch priority (lower = sooner)
/// - other optional fields are set depending on the [`EventKind`]
///
/// Events are immutable once published; the builder methods are meant to
/// be chained before the event is pushed.
#[derive(Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Effective dispatch priority (lower = sooner; see the
    /// module-level bands).
    pub priority: u16,
    /// Service that published the event ([`ServiceId::NONE`] for the
    /// runtime or external callers).
    pub origin: ServiceId,
    /// Subject service, if applicable (lifecycle / stop / start targets).
    pub service: Option<ServiceId>,
    /// Service name (lifecycle notifications, start-by-name requests).
    pub name: Option<Arc<str>>,
    /// Interface in demand (tracker request/undo events).
    pub iface: Option<InterfaceKey>,
    /// Scope value partitioning tracker-managed instances.
    pub scope: Option<Arc<str>>,
    /// Human-readable reason (errors, failure details).
    pub reason: Option<Arc<str>>,
    /// Application payload, shared between handlers.
    pub payload: Option<Payload>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp,
    /// the next global sequence number, and the kind's default priority.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            priority: kind.default_priority(),
            origin: ServiceId::NONE,
            service: None,
            name: None,
            iface: None,
            scope: None,
            reason: None,
            payload: None,
        }
    }

    /// Overrides the dispatch priority.
    ///
    /// Application kinds are offset past the reserved control band, so
    /// relative order among caller values is preserved (1 < 5 before and
    /// after banding). Control kinds keep the raw value (the runtime uses
    /// this to order its own traffic inside the band).
    #[inline]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = if self.kind.is_control() {
            priority as u16
        } else {
            priority as u16 + CONTROL_BAND_MAX + 1
        };
        self
    }

    /// Attaches the publishing service id.
    #[inline]
    pub fn with_origin(mut self, origin: ServiceId) -> Self {
        self.origin = origin;
        self
    }

    /// Attaches the subject service id.
    #[inline]
    pub fn with_service(mut self, service: ServiceId) -> Self {
        self.service = Some(service);
        self
    }

    /// Attaches a service name.
    #[inline]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches the interface in demand.
    #[inline]
    pub fn with_iface(mut self, iface: InterfaceKey) -> Self {
        self.iface = Some(iface);
        self
    }

    /// Attaches a tracker scope value.
    #[inline]
    pub fn with_scope(mut self, scope: impl Into<Arc<str>>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an application payload.
    #[inline]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Downcasts the payload to a concrete type.
    pub fn payload_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.payload.clone().and_then(|p| p.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("seq", &self.seq)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("origin", &self.origin)
            .field("service", &self.service)
            .field("name", &self.name)
            .field("iface", &self.iface)
            .field("scope", &self.scope)
            .field("reason", &self.reason)
            .field("payload", &self.payload.as_ref().map(|_| "<payload>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::new(EventKind::Custom("a"));
        let b = Event::new(EventKind::Custom("b"));
        assert!(b.seq > a.seq);
    }

    #[test]
    fn control_kinds_default_into_the_control_band() {
        assert_eq!(Event::new(EventKind::Quit).priority, PRIORITY_CONTROL);
        assert!(Event::new(EventKind::Custom("x")).priority > CONTROL_BAND_MAX);
    }

    #[test]
    fn application_priorities_stay_distinct_past_the_control_band() {
        let floor = Event::new(EventKind::Custom("x")).with_priority(0);
        let urgent = Event::new(EventKind::Custom("x")).with_priority(1);
        let later = Event::new(EventKind::Custom("x")).with_priority(5);

        assert_eq!(floor.priority, CONTROL_BAND_MAX + 1);
        assert!(urgent.priority > CONTROL_BAND_MAX);
        // Distinct caller values stay distinct and ordered after banding.
        assert!(urgent.priority < later.priority);
    }

    #[test]
    fn payload_downcast() {
        let ev = Event::new(EventKind::Custom("x")).with_payload(Arc::new(42u32));
        assert_eq!(*ev.payload_as::<u32>().unwrap(), 42);
        assert!(ev.payload_as::<String>().is_none());
    }
}
