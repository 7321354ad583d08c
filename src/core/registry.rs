//! # Service registry - owns services, their dependency graph, and the scheduler.
//!
//! A [`ServiceRegistry`] is the container for one execution context
//! (conventionally one per thread): it owns the service entity table, the
//! derived dependency graph, all handler/tracker registrations, and the
//! event loop that drives them. Cross-thread access goes only through the
//! registry's [`EventSink`] (and the cross-registry channel built on it),
//! never through shared direct pointers.
//!
//! ## Architecture
//! ```text
//! create(spec) ──► entity table (Installed) ──► evaluate()
//!                                                  │ required deps Active?
//!                                                  ▼
//!                                    inject ──► start() ──► Active ──► ServiceStarted
//!
//! start() run loop:
//!   intake (mpsc, cross-thread) ──► pump ──► EventQueue (priority, FIFO per band)
//!                                               │ pop
//!                                               ▼
//!              ┌─── control events: quit / start / stop / errors / tracker demand
//!              ▼
//!   dispatch ──► matching registrations, in registration order
//!       │            ├─ HandlerFlow::Consume      → skip remaining handlers
//!       │            ├─ HandlerFlow::Yield        → re-queue at back of band
//!       │            └─ Err(e)                    → kind's error callback / traced
//!       └─ no suspended handler left → completion callback (one-shot)
//!
//! Quit: drain already-enqueued events → stop all Active services in
//! reverse-dependency order (bounded by stop_grace) → start() returns.
//! ```
//!
//! ## Rules
//! - The entity table and graph are mutated **only** by the loop that owns
//!   them; handlers and services interact through events.
//! - A service starts only while every required dependency is `Active`;
//!   the instant a required dependency leaves `Active`, the dependent is
//!   stopped first (reverse topological order), so no dependent ever
//!   observes a dangling dependency.
//! - Required-dependency cycles are detected at start evaluation and fail
//!   the implicated services with a circular-dependency condition rather
//!   than deadlocking.
//! - Handler registrations are released when their guard drops or their
//!   subscriber stops; suspended continuations of stopped subscribers are
//!   never resumed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{RuntimeError, ServiceError};
use crate::events::{
    CompletionCallback, ErrorCallback, Event, EventHandler, EventKind, EventQueue, EventSink,
    EventTarget, HandlerContext, HandlerRegistration, Registration, RegistrationId, RegistryId,
    Work,
};
use crate::tracker::{Demand, DependencyTracker};

use super::config::RegistryConfig;
use super::graph::GraphView;
use super::service::{
    Capability, Injected, InterfaceKey, ServiceContext, ServiceEntity, ServiceId, ServiceSpec,
    ServiceState,
};

/// Process-wide registry id allocator (ids unique across threads).
static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// One dependency-tracker registration.
struct TrackerEntry {
    iface: InterfaceKey,
    owner: ServiceId,
    scope_key: Option<Arc<str>>,
    /// Taken out (`None`) only for the duration of a tracker callback.
    tracker: Option<Box<dyn DependencyTracker>>,
}

/// Outstanding tracker demand: (requester, iface, scope at request time).
struct DemandRecord {
    requester: ServiceId,
    iface: InterfaceKey,
    scope: Option<Arc<str>>,
}

/// Container and scheduler for one set of services.
///
/// See the module docs for the wiring diagram. The registry is not
/// `Sync`: it lives on one thread/task, and [`ServiceRegistry::start`]
/// runs its loop there. Other threads interact via [`EventSink`].
pub struct ServiceRegistry {
    id: RegistryId,
    cfg: RegistryConfig,

    entities: HashMap<ServiceId, ServiceEntity>,
    /// Install order; drives deterministic evaluation and queries.
    install_order: Vec<ServiceId>,

    queue: EventQueue,
    intake: mpsc::UnboundedReceiver<Event>,
    sink: EventSink,

    registrations: BTreeMap<RegistrationId, HandlerRegistration>,
    next_registration: u64,
    completions: HashMap<u64, Box<dyn CompletionCallback>>,
    error_callbacks: HashMap<EventKind, ErrorCallback>,

    trackers: Vec<TrackerEntry>,
    demanded: Vec<DemandRecord>,
    /// (service, iface) pairs already reported as unsatisfiable.
    reported_unsatisfied: HashSet<(ServiceId, InterfaceKey)>,

    root_cancel: CancellationToken,
}

impl ServiceRegistry {
    /// Creates a registry with the given configuration.
    pub fn new(cfg: RegistryConfig) -> Self {
        let id = RegistryId(NEXT_REGISTRY_ID.fetch_add(1, AtomicOrdering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id,
            cfg,
            entities: HashMap::new(),
            install_order: Vec::new(),
            queue: EventQueue::new(),
            intake: rx,
            sink: EventSink::new(id, tx),
            registrations: BTreeMap::new(),
            next_registration: 0,
            completions: HashMap::new(),
            error_callbacks: HashMap::new(),
            trackers: Vec::new(),
            demanded: Vec::new(),
            reported_unsatisfied: HashSet::new(),
            root_cancel: CancellationToken::new(),
        }
    }

    /// This registry's process-unique id.
    pub fn registry_id(&self) -> RegistryId {
        self.id
    }

    /// Returns a clonable, non-blocking sink feeding this registry.
    ///
    /// This is the only cross-thread surface; hand it to detached
    /// workers and to the cross-registry channel.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Pushes an event into this registry's queue.
    pub fn push(&self, event: Event) {
        self.sink.push(event);
    }

    /// Pushes an event and registers a one-shot completion callback,
    /// fired once this event instance has finished all dispatch
    /// (including every suspended handler's final resume).
    pub fn push_with_completion<C>(&mut self, event: Event, callback: C)
    where
        C: CompletionCallback,
    {
        self.completions.insert(event.seq, Box::new(callback));
        self.sink.push(event);
    }

    // ------------------------------------------------------------------
    // Install / query surface
    // ------------------------------------------------------------------

    /// Registers a new service entity in `Installed` state and records
    /// its dependency declarations. Creation does not imply start: the
    /// scheduler starts the service once every required dependency is
    /// `Active` (possibly satisfied on demand by a tracker).
    pub fn create(&mut self, spec: ServiceSpec) -> ServiceId {
        let entity = ServiceEntity::install(&spec, &self.root_cancel);
        let id = entity.id;
        let name = entity.name.clone();
        self.install_order.push(id);
        self.entities.insert(id, entity);
        self.sink.push(
            Event::new(EventKind::ServiceInstalled)
                .with_service(id)
                .with_name(name),
        );
        id
    }

    /// Requests shutdown of one service.
    ///
    /// Dependents requiring one of its interfaces are stopped first
    /// (reverse-dependency order). Processed by the run loop; no-op if
    /// the service is not `Active` when the request is dispatched.
    pub fn stop_service(&self, id: ServiceId) {
        self.sink
            .push(Event::new(EventKind::StopService).with_service(id));
    }

    /// Active services providing the interface `T`, in install order.
    pub fn query<T: ?Sized + 'static>(&self) -> Vec<ServiceId> {
        self.query_iface(&InterfaceKey::of::<T>())
    }

    /// Active services providing the interface, in install order.
    pub fn query_iface(&self, iface: &InterfaceKey) -> Vec<ServiceId> {
        GraphView::new(&self.entities, &self.install_order).active_providers(iface)
    }

    /// The capability a service exposes for `T`, while it is `Active`.
    pub fn capability<T: Send + Sync + 'static>(&self, id: ServiceId) -> Option<Arc<T>> {
        let entity = self.entities.get(&id)?;
        if !entity.is_active() {
            return None;
        }
        entity
            .instance
            .as_ref()?
            .capability(&InterfaceKey::of::<T>())?
            .downcast::<T>()
    }

    /// Current lifecycle state (`None` for unknown/uninstalled ids).
    pub fn state(&self, id: ServiceId) -> Option<ServiceState> {
        self.entities.get(&id).map(|e| e.state)
    }

    /// The service's 128-bit random identifier for cross-process
    /// correlation.
    pub fn global_id(&self, id: ServiceId) -> Option<Uuid> {
        self.entities.get(&id).map(|e| e.global_id)
    }

    /// The service's name.
    pub fn service_name(&self, id: ServiceId) -> Option<Arc<str>> {
        self.entities.get(&id).map(|e| e.name.clone())
    }

    // ------------------------------------------------------------------
    // Registration surface
    // ------------------------------------------------------------------

    /// Registers a persistent handler for an event kind.
    ///
    /// Handlers run in registration order on this registry's loop. The
    /// returned guard releases the registration on drop; the registration
    /// is also released when `subscriber` stops, whichever comes first.
    pub fn register_handler(
        &mut self,
        subscriber: ServiceId,
        kind: EventKind,
        target: EventTarget,
        handler: Arc<dyn EventHandler>,
    ) -> Registration {
        self.insert_registration(subscriber, kind, target, handler, false)
    }

    /// Registers a single-shot handler: released after its first
    /// completed (non-yielding) invocation.
    pub fn register_handler_once(
        &mut self,
        subscriber: ServiceId,
        kind: EventKind,
        target: EventTarget,
        handler: Arc<dyn EventHandler>,
    ) -> Registration {
        self.insert_registration(subscriber, kind, target, handler, true)
    }

    fn insert_registration(
        &mut self,
        subscriber: ServiceId,
        kind: EventKind,
        target: EventTarget,
        handler: Arc<dyn EventHandler>,
        once: bool,
    ) -> Registration {
        let id = RegistrationId(self.next_registration);
        self.next_registration += 1;
        self.registrations.insert(
            id,
            HandlerRegistration {
                kind,
                subscriber,
                target,
                handler,
                once,
            },
        );
        Registration::new(id, self.sink.clone())
    }

    /// Sets the companion error callback for an event kind.
    ///
    /// Invoked with the event and the error whenever a handler returns
    /// `Err` for that kind; without a callback the error is traced and
    /// dropped. A handler error never aborts the loop.
    pub fn set_error_callback(&mut self, kind: EventKind, callback: ErrorCallback) {
        self.error_callbacks.insert(kind, callback);
    }

    /// Registers a dependency tracker for the interface `T`.
    ///
    /// The tracker observes unmet/removed demand for the interface,
    /// optionally scoped by the value of `scope_key` in the requesting
    /// service's properties, and creates/destroys matching instances on
    /// demand.
    pub fn register_tracker<T: ?Sized + 'static>(
        &mut self,
        owner: ServiceId,
        scope_key: Option<&str>,
        tracker: Box<dyn DependencyTracker>,
    ) {
        self.trackers.push(TrackerEntry {
            iface: InterfaceKey::of::<T>(),
            owner,
            scope_key: scope_key.map(Arc::from),
            tracker: Some(tracker),
        });
    }

    // ------------------------------------------------------------------
    // Run loop
    // ------------------------------------------------------------------

    /// Runs this registry's event loop on the calling task.
    ///
    /// Performs the initial satisfaction pass over installed services,
    /// then pulls from the priority queue until a quit request arrives;
    /// quit drains already-enqueued events, stops every `Active` service
    /// in reverse-dependency order, and returns.
    ///
    /// Returns [`RuntimeError::GraceExceeded`] if some services did not
    /// stop within [`RegistryConfig::stop_grace`].
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        self.pump_intake();
        self.evaluate().await;

        loop {
            self.pump_intake();
            let work = match self.queue.pop() {
                Some(work) => work,
                None => match self.intake.recv().await {
                    Some(event) => {
                        self.queue.push_event(event);
                        continue;
                    }
                    None => return Err(RuntimeError::IntakeClosed),
                },
            };
            if self.process(work).await {
                return self.drain_and_shutdown().await;
            }
        }
    }

    /// Moves everything waiting in the intake channel into the queue.
    fn pump_intake(&mut self) {
        while let Ok(event) = self.intake.try_recv() {
            self.queue.push_event(event);
        }
    }

    /// Processes one unit of work; returns true when a quit was seen.
    async fn process(&mut self, work: Work) -> bool {
        match work {
            Work::Dispatch(event) => {
                if event.kind == EventKind::Deregister {
                    if let Some(rid) = event.payload_as::<RegistrationId>() {
                        self.registrations.remove(rid.as_ref());
                    }
                    return false;
                }
                let quit = event.kind == EventKind::Quit;
                self.handle_control(&event).await;
                self.dispatch(event).await;
                quit
            }
            Work::Resume { event, pending } => {
                self.resume(event, pending).await;
                false
            }
        }
    }

    /// Runtime reaction to control events, before handler dispatch.
    async fn handle_control(&mut self, event: &Event) {
        match event.kind {
            EventKind::StartService => {
                let id = event
                    .service
                    .or_else(|| self.find_by_name(event.name.as_deref()));
                if let Some(id) = id {
                    if let Some(entity) = self.entities.get_mut(&id) {
                        if entity.state == ServiceState::Unknown {
                            entity.state = ServiceState::Installed;
                        }
                        entity.blocked = false;
                        self.reported_unsatisfied.retain(|(s, _)| *s != id);
                    }
                    self.evaluate().await;
                }
            }
            EventKind::StopService => {
                if let Some(id) = event.service {
                    self.stop_cascade(id).await;
                }
            }
            EventKind::RecoverableError => {
                tracing::warn!(
                    origin = %event.origin,
                    reason = event.reason.as_deref().unwrap_or(""),
                    "recoverable error"
                );
            }
            EventKind::UnrecoverableError => {
                self.handle_unrecoverable(event).await;
            }
            EventKind::DependencyRequest => {
                self.route_trackers(event, true).await;
                self.evaluate().await;
            }
            EventKind::DependencyUndoRequest => {
                self.route_trackers(event, false).await;
            }
            _ => {}
        }
    }

    fn find_by_name(&self, name: Option<&str>) -> Option<ServiceId> {
        let name = name?;
        self.install_order
            .iter()
            .find(|id| {
                self.entities
                    .get(*id)
                    .is_some_and(|e| e.name.as_ref() == name)
            })
            .copied()
    }

    /// Forces the originating service out of `Active` into `Unknown`.
    ///
    /// Only an `Active` service can be forced out; for any other state the
    /// error is traced and dropped (a failed or never-started service is
    /// already not running, and stays restartable).
    async fn handle_unrecoverable(&mut self, event: &Event) {
        let id = event.service.unwrap_or(event.origin);
        if !self.entities.get(&id).is_some_and(|e| e.is_active()) {
            tracing::warn!(
                service = %id,
                reason = event.reason.as_deref().unwrap_or(""),
                "unrecoverable error for a non-active service ignored"
            );
            return;
        }
        self.stop_cascade(id).await;
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.state = ServiceState::Unknown;
            let name = entity.name.clone();
            self.sink.push(
                Event::new(EventKind::ServiceFailed)
                    .with_service(id)
                    .with_name(name)
                    .with_reason(
                        event
                            .reason
                            .clone()
                            .unwrap_or_else(|| Arc::from("unrecoverable error")),
                    ),
            );
        }
    }

    // ------------------------------------------------------------------
    // Handler dispatch
    // ------------------------------------------------------------------

    /// Dispatches an event to all matching registrations, in
    /// registration order; re-queues suspended handlers or fires the
    /// completion callback.
    async fn dispatch(&mut self, event: Event) {
        let matching: Vec<RegistrationId> = self
            .registrations
            .iter()
            .filter(|(_, reg)| reg.matches(&event))
            .map(|(id, _)| *id)
            .collect();
        let yielded = self.invoke(&event, &matching).await;
        self.settle(event, yielded);
    }

    /// Re-invokes handlers that yielded on a previous pass.
    async fn resume(&mut self, event: Event, pending: Vec<RegistrationId>) {
        let yielded = self.invoke(&event, &pending).await;
        self.settle(event, yielded);
    }

    fn settle(&mut self, event: Event, yielded: Vec<RegistrationId>) {
        if yielded.is_empty() {
            if let Some(callback) = self.completions.remove(&event.seq) {
                callback.on_complete(&event);
            }
        } else {
            // Back of the band: fresh enqueue order keeps FIFO fairness
            // among suspended handlers.
            let priority = event.priority;
            self.queue.push(
                priority,
                Work::Resume {
                    event,
                    pending: yielded,
                },
            );
        }
    }

    /// Invokes the given registrations against one event; returns the
    /// ids that yielded, in invocation order.
    async fn invoke(&mut self, event: &Event, ids: &[RegistrationId]) -> Vec<RegistrationId> {
        let mut yielded = Vec::new();
        for rid in ids {
            // Released registrations (guard dropped, subscriber stopped)
            // are skipped; their continuations die here.
            let Some(reg) = self.registrations.get(rid) else {
                continue;
            };
            let handler = reg.handler.clone();
            let once = reg.once;
            let ctx = HandlerContext::new(self.sink.clone(), reg.subscriber);
            match handler.on_event(event, &ctx).await {
                Ok(flow) => {
                    if flow.is_yield() {
                        yielded.push(*rid);
                    } else if once {
                        self.registrations.remove(rid);
                    }
                    if flow.stops_propagation() {
                        break;
                    }
                }
                Err(error) => {
                    if let Some(callback) = self.error_callbacks.get(&event.kind) {
                        callback(event, &error);
                    } else {
                        tracing::warn!(
                            handler = handler.name(),
                            kind = event.kind.as_label(),
                            error = %error,
                            "handler error dropped"
                        );
                    }
                }
            }
        }
        yielded
    }

    // ------------------------------------------------------------------
    // Start evaluation & injection protocol
    // ------------------------------------------------------------------

    /// Satisfaction pass: starts every installed service whose required
    /// dependencies are all `Active` (to fixpoint), emits tracker demand
    /// for unmet interfaces, and fails required-dependency cycles.
    async fn evaluate(&mut self) {
        loop {
            let candidates =
                GraphView::new(&self.entities, &self.install_order).start_candidates();
            let mut progressed = false;
            for id in candidates {
                if self.try_start(id).await {
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        self.emit_demand();
        self.fail_cycles();
    }

    /// Attempts to start one service; true if it reached `Active`.
    async fn try_start(&mut self, id: ServiceId) -> bool {
        // Gather injections from Active providers before touching the
        // target entity.
        let injections = self.collect_injections(id);

        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        if entity.state != ServiceState::Installed {
            return false;
        }
        entity.state = ServiceState::Starting;
        let mut instance = match entity.instance.take() {
            Some(instance) => instance,
            None => {
                entity.state = ServiceState::Installed;
                return false;
            }
        };
        let name = entity.name.clone();
        let properties = entity.properties.clone();
        let cancel = entity.cancel.clone();
        for dep in &injections {
            entity.injected.push((dep.iface, dep.provider));
        }
        for dep in injections {
            instance.inject(dep);
        }

        let sink = self.sink.clone();
        let mut ctx = ServiceContext::new(id, &properties, &sink, &cancel);
        let result = match self.cfg.start_timeout_bound() {
            Some(bound) => match timeout(bound, instance.start(&mut ctx)).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout { timeout: bound }),
            },
            None => instance.start(&mut ctx).await,
        };

        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        entity.instance = Some(instance);
        match result {
            Ok(()) => {
                entity.state = ServiceState::Active;
                self.sink.push(
                    Event::new(EventKind::ServiceStarted)
                        .with_service(id)
                        .with_name(name),
                );
                self.inject_into_dependents(id);
                true
            }
            Err(error) => {
                entity.state = if error.is_fatal() {
                    ServiceState::Unknown
                } else {
                    ServiceState::Installed
                };
                // Failed start: the injected capabilities are withdrawn.
                let injected = std::mem::take(&mut entity.injected);
                if let Some(instance) = entity.instance.as_mut() {
                    for (iface, provider) in injected {
                        instance.revoke(iface, provider);
                    }
                }
                self.sink.push(
                    Event::new(EventKind::ServiceFailed)
                        .with_service(id)
                        .with_name(name)
                        .with_reason(error.as_message()),
                );
                false
            }
        }
    }

    /// Capabilities of Active providers for every declared dependency.
    fn collect_injections(&self, id: ServiceId) -> Vec<Injected> {
        let Some(entity) = self.entities.get(&id) else {
            return Vec::new();
        };
        let view = GraphView::new(&self.entities, &self.install_order);
        let mut injections = Vec::new();
        for iface in entity.requires.iter().chain(entity.optional.iter()) {
            for provider in view.active_providers(iface) {
                if let Some(capability) = self.provider_capability(provider, iface) {
                    injections.push(Injected {
                        iface: *iface,
                        provider,
                        capability,
                    });
                }
            }
        }
        injections
    }

    fn provider_capability(
        &self,
        provider: ServiceId,
        iface: &InterfaceKey,
    ) -> Option<Capability> {
        self.entities
            .get(&provider)?
            .instance
            .as_ref()?
            .capability(iface)
    }

    /// A service just became `Active`: inject its capabilities into
    /// already-Active dependents declaring its interfaces (optional
    /// dependencies, or additional fan-in providers).
    fn inject_into_dependents(&mut self, provider: ServiceId) {
        let Some(entity) = self.entities.get(&provider) else {
            return;
        };
        let provides = entity.provides.clone();
        let dependents: Vec<ServiceId> = self
            .install_order
            .iter()
            .filter(|id| **id != provider)
            .filter(|id| {
                self.entities.get(*id).is_some_and(|e| {
                    e.is_active() && provides.iter().any(|iface| e.declares(iface))
                })
            })
            .copied()
            .collect();

        for dependent_id in dependents {
            for iface in &provides {
                let declared = self
                    .entities
                    .get(&dependent_id)
                    .is_some_and(|e| e.declares(iface) && !e.has_injected(iface, provider));
                if !declared {
                    continue;
                }
                let Some(capability) = self.provider_capability(provider, iface) else {
                    continue;
                };
                if let Some(dependent) = self.entities.get_mut(&dependent_id) {
                    dependent.injected.push((*iface, provider));
                    if let Some(instance) = dependent.instance.as_mut() {
                        instance.inject(Injected {
                            iface: *iface,
                            provider,
                            capability,
                        });
                    }
                }
            }
        }
    }

    /// Emits tracker demand for unmet required interfaces, once per
    /// (requester, interface); reports interfaces nobody can satisfy.
    fn emit_demand(&mut self) {
        let view = GraphView::new(&self.entities, &self.install_order);
        let mut to_emit: Vec<(ServiceId, InterfaceKey, Option<Arc<str>>)> = Vec::new();
        let mut unsatisfiable: Vec<(ServiceId, InterfaceKey)> = Vec::new();

        for id in &self.install_order {
            let Some(entity) = self.entities.get(id) else {
                continue;
            };
            if entity.state != ServiceState::Installed || entity.blocked {
                continue;
            }
            for iface in view.unmet_required(*id) {
                let already = self
                    .demanded
                    .iter()
                    .any(|d| d.requester == *id && d.iface == iface);
                if already {
                    continue;
                }
                // An installed (not yet Active) provider may satisfy this
                // later without a tracker.
                let installed_provider = self.entities.values().any(|e| {
                    e.id != *id
                        && e.state == ServiceState::Installed
                        && !e.blocked
                        && e.provides.contains(&iface)
                });
                match self.trackers.iter().find(|t| t.iface == iface) {
                    Some(tracker) => {
                        let scope = match tracker.scope_key.as_deref() {
                            Some(key) => match entity.properties.get_str(key) {
                                Ok(scope) => Some(scope),
                                Err(_) => {
                                    // Scoped tracker, requester lacks the
                                    // scope property: no demand.
                                    continue;
                                }
                            },
                            None => None,
                        };
                        to_emit.push((*id, iface, scope));
                    }
                    None if !installed_provider => {
                        if self.reported_unsatisfied.insert((*id, iface)) {
                            unsatisfiable.push((*id, iface));
                        }
                    }
                    None => {}
                }
            }
        }

        for (requester, iface, scope) in to_emit {
            self.demanded.push(DemandRecord {
                requester,
                iface,
                scope: scope.clone(),
            });
            let mut event = Event::new(EventKind::DependencyRequest)
                .with_service(requester)
                .with_iface(iface);
            if let Some(scope) = scope {
                event = event.with_scope(scope);
            }
            self.sink.push(event);
        }

        for (requester, iface) in unsatisfiable {
            self.sink.push(
                Event::new(EventKind::RecoverableError)
                    .with_service(requester)
                    .with_iface(iface)
                    .with_reason(format!(
                        "no provider or tracker for required interface {}",
                        iface.name()
                    )),
            );
        }
    }

    /// Fails every service sitting on a required-dependency cycle.
    fn fail_cycles(&mut self) {
        let cyclic =
            GraphView::new(&self.entities, &self.install_order).detect_required_cycles();
        for id in cyclic {
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.blocked = true;
                let name = entity.name.clone();
                self.sink.push(
                    Event::new(EventKind::ServiceFailed)
                        .with_service(id)
                        .with_name(name)
                        .with_reason("circular dependency"),
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Stop & teardown
    // ------------------------------------------------------------------

    /// Stops a service, propagating to dependents first
    /// (reverse-dependency order). No-op unless the target is `Active`.
    async fn stop_cascade(&mut self, target: ServiceId) {
        let is_active = self
            .entities
            .get(&target)
            .is_some_and(|e| e.is_active());
        if !is_active {
            return;
        }
        let order = GraphView::new(&self.entities, &self.install_order).stop_order(target);
        for id in order {
            self.stop_one(id, false).await;
        }
    }

    /// Stops one service; dependents requiring it must already be
    /// stopped. Returns false if the service ended in `Unknown`.
    async fn stop_one(&mut self, id: ServiceId, bounded: bool) -> bool {
        if !self.entities.get(&id).is_some_and(|e| e.is_active()) {
            return true;
        }

        // Revoke this provider's capabilities from everyone still holding
        // them (optional dependents stay Active; required dependents were
        // stopped earlier in the cascade and already dropped theirs).
        let holders = GraphView::new(&self.entities, &self.install_order).injected_dependents(id);
        for holder in holders {
            if holder == id {
                continue;
            }
            if let Some(dependent) = self.entities.get_mut(&holder) {
                let mut revoked = Vec::new();
                dependent.injected.retain(|(iface, provider)| {
                    if *provider == id {
                        revoked.push(*iface);
                        false
                    } else {
                        true
                    }
                });
                if let Some(instance) = dependent.instance.as_mut() {
                    for iface in revoked {
                        instance.revoke(iface, id);
                    }
                }
            }
        }

        let Some(entity) = self.entities.get_mut(&id) else {
            return true;
        };
        entity.state = ServiceState::Stopping;
        let mut instance = match entity.instance.take() {
            Some(instance) => instance,
            None => {
                entity.state = ServiceState::Installed;
                return true;
            }
        };
        let name = entity.name.clone();
        let properties = entity.properties.clone();
        let cancel = entity.cancel.clone();
        cancel.cancel(); // detached workers wind down

        let sink = self.sink.clone();
        let mut ctx = ServiceContext::new(id, &properties, &sink, &cancel);
        let result = match (bounded, self.cfg.stop_grace_bound()) {
            (true, Some(grace)) => match timeout(grace, instance.stop(&mut ctx)).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout { timeout: grace }),
            },
            _ => instance.stop(&mut ctx).await,
        };

        // Registrations owned by a stopped subscriber are released;
        // pending continuations will be skipped at resume time.
        self.registrations.retain(|_, reg| reg.subscriber != id);

        let Some(entity) = self.entities.get_mut(&id) else {
            return true;
        };
        entity.instance = Some(instance);
        entity.cancel = self.root_cancel.child_token();

        // The stopped service drops its own injected capabilities.
        let injected = std::mem::take(&mut entity.injected);
        if let Some(instance) = entity.instance.as_mut() {
            for (iface, provider) in injected {
                instance.revoke(iface, provider);
            }
        }

        match result {
            Ok(()) => {
                entity.state = ServiceState::Installed;
                self.sink.push(
                    Event::new(EventKind::ServiceStopped)
                        .with_service(id)
                        .with_name(name),
                );
                true
            }
            Err(error) => {
                entity.state = ServiceState::Unknown;
                self.sink.push(
                    Event::new(EventKind::ServiceFailed)
                        .with_service(id)
                        .with_name(name)
                        .with_reason(error.as_message()),
                );
                false
            }
        }
    }

    /// Destroys a service entity: stops it if needed (dependents first),
    /// withdraws its tracker demand, and removes it from the table.
    /// The id is never reused. Terminal.
    pub async fn uninstall(&mut self, id: ServiceId) {
        if !self.entities.contains_key(&id) {
            return;
        }
        self.stop_cascade(id).await;

        // Withdraw outstanding demand so trackers can release scoped
        // instances this service was the last consumer of.
        let mut withdrawn = Vec::new();
        self.demanded.retain(|record| {
            if record.requester == id {
                withdrawn.push((record.iface, record.scope.clone()));
                false
            } else {
                true
            }
        });
        for (iface, scope) in withdrawn {
            let mut event = Event::new(EventKind::DependencyUndoRequest)
                .with_service(id)
                .with_iface(iface);
            if let Some(scope) = scope {
                event = event.with_scope(scope);
            }
            self.sink.push(event);
        }

        self.registrations.retain(|_, reg| reg.subscriber != id);
        self.trackers.retain(|entry| entry.owner != id);
        self.reported_unsatisfied.retain(|(s, _)| *s != id);

        if let Some(mut entity) = self.entities.remove(&id) {
            entity.state = ServiceState::Uninstalled;
            self.install_order.retain(|other| *other != id);
            self.sink.push(
                Event::new(EventKind::ServiceUninstalled)
                    .with_service(id)
                    .with_name(entity.name.clone()),
            );
        }
    }

    /// Routes a demand event to every tracker registered for its
    /// interface.
    async fn route_trackers(&mut self, event: &Event, request: bool) {
        let Some(iface) = event.iface else {
            return;
        };
        let demand = Demand {
            iface,
            scope: event.scope.clone(),
            requester: event.service.unwrap_or(ServiceId::NONE),
        };
        for index in 0..self.trackers.len() {
            let taken = match self.trackers.get_mut(index) {
                Some(entry) if entry.iface == iface => entry.tracker.take(),
                _ => None,
            };
            let Some(mut tracker) = taken else {
                continue;
            };
            let result = if request {
                tracker.on_request(&demand, self).await
            } else {
                tracker.on_undo(&demand, self).await
            };
            if let Err(error) = result {
                tracing::warn!(
                    tracker = tracker.name(),
                    iface = iface.name(),
                    error = %error,
                    "tracker callback failed"
                );
            }
            // The vector may have shifted if the tracker uninstalled a
            // tracker-owning service; reinsert into the emptied slot.
            if let Some(entry) = self
                .trackers
                .iter_mut()
                .find(|entry| entry.iface == iface && entry.tracker.is_none())
            {
                entry.tracker = Some(tracker);
            }
        }
    }

    /// Quit path: drain already-enqueued events, then stop everything.
    async fn drain_and_shutdown(&mut self) -> Result<(), RuntimeError> {
        // One final pump: events enqueued before (or concurrently with)
        // the quit are still delivered; later arrivals are not.
        self.pump_intake();
        while let Some(work) = self.queue.pop() {
            // Further quits during the drain are already being honored.
            self.process(work).await;
        }

        let mut stuck = Vec::new();
        loop {
            let next = self
                .install_order
                .iter()
                .rev()
                .find(|id| self.entities.get(*id).is_some_and(|e| e.is_active()))
                .copied();
            let Some(target) = next else {
                break;
            };
            let order =
                GraphView::new(&self.entities, &self.install_order).stop_order(target);
            for id in order {
                let name = self.service_name(id);
                if !self.stop_one(id, true).await {
                    if let Some(name) = name {
                        stuck.push(name.to_string());
                    }
                }
            }
        }

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::GraceExceeded {
                grace: self.cfg.stop_grace,
                stuck,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::service::Service;
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

    #[test]
    fn create_installs_without_starting() {
        let mut registry = ServiceRegistry::new(RegistryConfig::default());
        let id = registry.create(ServiceSpec::new("noop", |_| Box::new(Noop)));
        assert_eq!(registry.state(id), Some(ServiceState::Installed));
        // Not Active yet, so it is not queryable as a provider.
        assert!(registry.query_iface(&InterfaceKey::of::<Noop>()).is_empty());
        assert_eq!(registry.service_name(id).as_deref(), Some("noop"));
    }

    #[tokio::test]
    async fn uninstall_is_terminal() {
        let mut registry = ServiceRegistry::new(RegistryConfig::default());
        let id = registry.create(ServiceSpec::new("noop", |_| Box::new(Noop)));
        registry.uninstall(id).await;
        assert_eq!(registry.state(id), None);
        assert_eq!(registry.service_name(id), None);
        // Uninstalling again is a no-op.
        registry.uninstall(id).await;
    }

    #[test]
    fn registry_ids_are_process_unique() {
        let a = ServiceRegistry::new(RegistryConfig::default());
        let b = ServiceRegistry::new(RegistryConfig::default());
        assert_ne!(a.registry_id(), b.registry_id());
    }
}
