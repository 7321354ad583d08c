//! # Service abstraction: identity, state machine, and the lifecycle trait.
//!
//! A **service** is the lifecycle unit of the runtime: an opaque
//! implementation behind the [`Service`] trait, identified by a
//! process-unique [`ServiceId`], configured by a
//! [`PropertyBag`](crate::PropertyBag), and declaring the interfaces it
//! provides and depends on via [`InterfaceKey`]s.
//!
//! ## State machine
//! ```text
//! Installed ──► Starting ──► Active ──► Stopping ──► Installed   (clean stop)
//!                  │                        │
//!                  └── start() Err ◄──      └──► Unknown          (failed stop / fatal)
//!
//! Uninstalled: terminal, entered on destruction from any state.
//! ```
//! Transitions are driven only by the owning registry's scheduler, never
//! by the service itself.
//!
//! ## Rules
//! - `start()` is invoked only while **every** required dependency is
//!   `Active`; the instant one leaves `Active`, the dependent is stopped
//!   first (reverse topological order).
//! - Dependencies arrive via [`Service::inject`] before `start()` (and
//!   later, for optional dependencies that appear while `Active`), and
//!   leave via [`Service::revoke`]. The injected [`Capability`] is valid
//!   only between the two notifications; drop the clone on revoke.
//! - A service exposes its interfaces through [`Service::capability`];
//!   the registry calls it on activation and hands clones to dependents.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::events::{Event, EventSink};
use crate::properties::PropertyBag;

/// Process-wide service id allocator.
///
/// Shared by every registry in the process so ids are pairwise distinct
/// across threads. Starts at 1; zero is reserved as "none/destroyed"
/// ([`ServiceId::NONE`]). Ids are never reused.
static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, monotonically assigned service identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(u64);

impl ServiceId {
    /// Reserved "no service" value (also used as the runtime origin on
    /// events the registry publishes itself).
    pub const NONE: ServiceId = ServiceId(0);

    /// Allocates the next process-unique id.
    pub(crate) fn next() -> Self {
        ServiceId(NEXT_SERVICE_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a service entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Recorded in the registry; not running. Start-eligible once every
    /// required dependency is `Active`.
    Installed,
    /// `start()` in progress.
    Starting,
    /// Running; its capabilities are injectable into dependents.
    Active,
    /// `stop()` in progress.
    Stopping,
    /// `stop()` failed or a fatal error occurred. Terminal for automatic
    /// management; only an explicit `StartService` control event
    /// re-enters it to `Installed`.
    Unknown,
    /// Destroyed. Terminal.
    Uninstalled,
}

impl ServiceState {
    /// Returns a short stable label (kebab-case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceState::Installed => "installed",
            ServiceState::Starting => "starting",
            ServiceState::Active => "active",
            ServiceState::Stopping => "stopping",
            ServiceState::Unknown => "unknown",
            ServiceState::Uninstalled => "uninstalled",
        }
    }
}

/// Stable runtime key for an interface type.
///
/// Replaces compile-time-templated interface dispatch with a runtime map
/// key: the `TypeId` of the interface marker type plus its type name for
/// diagnostics. Construct with [`InterfaceKey::of`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceKey {
    type_id: TypeId,
    name: &'static str,
}

impl InterfaceKey {
    /// Key for the interface type `T`.
    ///
    /// `T` is typically the shared capability type a service exposes
    /// through [`Service::capability`] (a concrete struct or a trait
    /// object wrapper).
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Human-readable interface name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for InterfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceKey({})", self.name)
    }
}

/// Type-erased capability handed from a provider to its dependents.
///
/// A cheap `Arc` clone; the borrow discipline is temporal, not static:
/// the capability is valid between the `inject` and `revoke`
/// notifications, and dependents must drop their clone on revoke.
#[derive(Clone)]
pub struct Capability(Arc<dyn Any + Send + Sync>);

impl Capability {
    /// Wraps a shared capability object.
    pub fn new<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Capability(value)
    }

    /// Downcasts to the concrete capability type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Capability(..)")
    }
}

/// A dependency instance delivered to a dependent.
#[derive(Clone, Debug)]
pub struct Injected {
    /// Interface this instance satisfies.
    pub iface: InterfaceKey,
    /// Provider service id.
    pub provider: ServiceId,
    /// The provider's capability object for this interface.
    pub capability: Capability,
}

/// Context handed to a service during `start()`/`stop()`.
///
/// Gives the service its identity, configuration, a non-blocking event
/// sink, and a cancellation token for detached workers.
pub struct ServiceContext<'a> {
    id: ServiceId,
    properties: &'a PropertyBag,
    sink: &'a EventSink,
    cancel: &'a CancellationToken,
}

impl<'a> ServiceContext<'a> {
    pub(crate) fn new(
        id: ServiceId,
        properties: &'a PropertyBag,
        sink: &'a EventSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            id,
            properties,
            sink,
            cancel,
        }
    }

    /// This service's id.
    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// The service's property bag.
    pub fn properties(&self) -> &PropertyBag {
        self.properties
    }

    /// Pushes an event with this service as origin.
    pub fn push(&self, event: Event) {
        self.sink.push(event.with_origin(self.id));
    }

    /// Returns a clonable sink for detached workers.
    ///
    /// A worker (e.g. a connection-listening thread) communicates back
    /// only via events pushed through this sink.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Returns a child cancellation token.
    ///
    /// Cancelled when this service is stopped; hand it to detached
    /// workers so they wind down cooperatively.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}

/// Lifecycle-managed component implementation.
///
/// Implementations are single-threaded with respect to their owning
/// registry: all trait methods run sequentially on the registry's loop.
///
/// ## Example
/// ```rust
/// use async_trait::async_trait;
/// use std::sync::Arc;
/// use compvisor::{
///     Capability, Injected, InterfaceKey, Service, ServiceContext, ServiceError, ServiceId,
/// };
///
/// pub struct Clock(pub std::time::Instant);
///
/// struct ClockService {
///     shared: Arc<Clock>,
/// }
///
/// #[async_trait]
/// impl Service for ClockService {
///     async fn start(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
///         // typed property read; a missing key fails the start
///         let _label = ctx.properties().get_str("label")?;
///         Ok(())
///     }
///
///     async fn stop(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
///         Ok(())
///     }
///
///     fn capability(&self, iface: &InterfaceKey) -> Option<Capability> {
///         (*iface == InterfaceKey::of::<Clock>())
///             .then(|| Capability::new(self.shared.clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait Service: Send + 'static {
    /// Brings the service to `Active`.
    ///
    /// Invoked only while every required dependency is `Active` and after
    /// all available dependencies were injected. A configuration error
    /// (missing/mistyped property) should be surfaced with `?`; it fails
    /// the start and leaves the service `Installed`.
    async fn start(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError>;

    /// Takes the service out of `Active`.
    ///
    /// Invoked after every dependent requiring this service was stopped
    /// and after revoke notifications were delivered. An error here moves
    /// the service to the terminal `Unknown` state.
    async fn stop(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError>;

    /// A declared dependency became available.
    ///
    /// Called before `start()` for dependencies available at start
    /// evaluation, and while `Active` for optional dependencies that
    /// appear later.
    fn inject(&mut self, dep: Injected) {
        let _ = dep;
    }

    /// A previously injected dependency is going away; drop its
    /// capability clone now.
    fn revoke(&mut self, iface: InterfaceKey, provider: ServiceId) {
        let _ = (iface, provider);
    }

    /// Returns the shared capability object for one of this service's
    /// declared interfaces, or `None` if the key is not provided.
    fn capability(&self, iface: &InterfaceKey) -> Option<Capability> {
        let _ = iface;
        None
    }
}

/// Factory producing fresh service instances.
///
/// Shared so dependency trackers can re-create scoped instances on
/// demand; receives the instance's property bag.
pub type ServiceFactory = Arc<dyn Fn(&PropertyBag) -> Box<dyn Service> + Send + Sync>;

/// Specification for installing a service into a registry.
///
/// Bundles together the factory, the interfaces the service provides,
/// its required and optional dependency declarations, and its properties.
///
/// ## Example
/// ```rust
/// use compvisor::{PropertyBag, ServiceSpec};
/// # use async_trait::async_trait;
/// # use compvisor::{Service, ServiceContext, ServiceError};
/// # struct Host; struct Codec;
/// # struct HostService;
/// # #[async_trait]
/// # impl Service for HostService {
/// #     async fn start(&mut self, _: &mut ServiceContext<'_>) -> Result<(), ServiceError> { Ok(()) }
/// #     async fn stop(&mut self, _: &mut ServiceContext<'_>) -> Result<(), ServiceError> { Ok(()) }
/// # }
///
/// let spec = ServiceSpec::new("tcp-host", |_props| Box::new(HostService))
///     .provides::<Host>()
///     .requires::<Codec>()
///     .with_properties(PropertyBag::new().with("address", "0.0.0.0:8001"));
/// assert_eq!(spec.name(), "tcp-host");
/// ```
#[derive(Clone)]
pub struct ServiceSpec {
    name: Arc<str>,
    factory: ServiceFactory,
    provides: Vec<InterfaceKey>,
    requires: Vec<InterfaceKey>,
    optional: Vec<InterfaceKey>,
    properties: PropertyBag,
}

impl ServiceSpec {
    /// Creates a spec from a name and a factory closure.
    pub fn new<F>(name: impl Into<Arc<str>>, factory: F) -> Self
    where
        F: Fn(&PropertyBag) -> Box<dyn Service> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            provides: Vec::new(),
            requires: Vec::new(),
            optional: Vec::new(),
            properties: PropertyBag::new(),
        }
    }

    /// Declares that instances provide the interface `T`.
    pub fn provides<T: ?Sized + 'static>(mut self) -> Self {
        self.provides.push(InterfaceKey::of::<T>());
        self
    }

    /// Declares a required dependency on the interface `T`.
    ///
    /// The service cannot reach `Active` while `T` has no `Active`
    /// provider; losing the provider stops the service.
    pub fn requires<T: ?Sized + 'static>(mut self) -> Self {
        self.requires.push(InterfaceKey::of::<T>());
        self
    }

    /// Declares an optional dependency on the interface `T`.
    ///
    /// Does not gate start/stop; inject/revoke still fire when a provider
    /// becomes available/unavailable.
    pub fn optional<T: ?Sized + 'static>(mut self) -> Self {
        self.optional.push(InterfaceKey::of::<T>());
        self
    }

    /// Attaches the instance's property bag.
    pub fn with_properties(mut self, properties: PropertyBag) -> Self {
        self.properties = properties;
        self
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attached property bag.
    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    pub(crate) fn factory(&self) -> ServiceFactory {
        self.factory.clone()
    }

    pub(crate) fn provided(&self) -> &[InterfaceKey] {
        &self.provides
    }

    pub(crate) fn required(&self) -> &[InterfaceKey] {
        &self.requires
    }

    pub(crate) fn optional_deps(&self) -> &[InterfaceKey] {
        &self.optional
    }
}

/// One service entity owned by a registry.
///
/// Holds identity, state, declarations, the live instance, and the set of
/// currently injected providers (so revokes can be delivered precisely).
pub(crate) struct ServiceEntity {
    pub(crate) id: ServiceId,
    /// 128-bit random identifier for cross-process correlation.
    pub(crate) global_id: Uuid,
    pub(crate) name: Arc<str>,
    pub(crate) state: ServiceState,
    pub(crate) provides: Vec<InterfaceKey>,
    pub(crate) requires: Vec<InterfaceKey>,
    pub(crate) optional: Vec<InterfaceKey>,
    pub(crate) properties: PropertyBag,
    /// Taken out (`None`) only for the duration of a lifecycle call.
    pub(crate) instance: Option<Box<dyn Service>>,
    /// Providers currently injected into this service: (iface, provider).
    pub(crate) injected: Vec<(InterfaceKey, ServiceId)>,
    /// Set when the service sits on a detected required-dependency cycle;
    /// cleared by an explicit `StartService` control event.
    pub(crate) blocked: bool,
    /// Cancelled when the service is stopped; parents detached workers.
    pub(crate) cancel: CancellationToken,
}

impl ServiceEntity {
    pub(crate) fn install(spec: &ServiceSpec, root: &CancellationToken) -> Self {
        Self {
            id: ServiceId::next(),
            global_id: Uuid::new_v4(),
            name: spec.name_arc(),
            state: ServiceState::Installed,
            provides: spec.provided().to_vec(),
            requires: spec.required().to_vec(),
            optional: spec.optional_deps().to_vec(),
            properties: spec.properties().clone(),
            instance: Some((spec.factory())(spec.properties())),
            injected: Vec::new(),
            blocked: false,
            cancel: root.child_token(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state == ServiceState::Active
    }

    pub(crate) fn declares(&self, iface: &InterfaceKey) -> bool {
        self.requires.contains(iface) || self.optional.contains(iface)
    }

    pub(crate) fn has_injected(&self, iface: &InterfaceKey, provider: ServiceId) -> bool {
        self.injected
            .iter()
            .any(|(i, p)| i == iface && *p == provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_and_monotonic() {
        let a = ServiceId::next();
        let b = ServiceId::next();
        assert!(b > a);
        assert_ne!(a, ServiceId::NONE);
    }

    #[test]
    fn interface_keys_distinguish_types() {
        struct A;
        struct B;
        assert_eq!(InterfaceKey::of::<A>(), InterfaceKey::of::<A>());
        assert_ne!(InterfaceKey::of::<A>(), InterfaceKey::of::<B>());
    }

    #[test]
    fn capability_downcast_is_checked() {
        struct Cap(#[allow(dead_code)] u32);
        let cap = Capability::new(Arc::new(Cap(7)));
        assert!(cap.downcast::<Cap>().is_some());
        assert!(cap.downcast::<String>().is_none());
    }
}
