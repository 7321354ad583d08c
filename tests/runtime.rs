//! End-to-end scheduler tests: lifecycle gating, priorities, suspension,
//! trackers, and quit semantics.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use compvisor::{
    Capability, Event, EventHandler, EventKind, EventTarget, HandlerContext, HandlerFlow, Injected,
    InterfaceKey, PropertyBag, RegistryConfig, RuntimeError, Service, ServiceContext, ServiceError,
    ServiceId, ServiceRegistry, ServiceSpec, ServiceState,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn record(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

// Interface marker types double as the shared capability objects.
struct IfaceA;
struct IfaceDb;

/// Service that journals every lifecycle notification it receives.
struct Probe {
    label: &'static str,
    log: Log,
    capability: Option<(InterfaceKey, Capability)>,
    fail_start: bool,
}

#[async_trait]
impl Service for Probe {
    async fn start(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        if self.fail_start {
            return Err(ServiceError::failed("boom"));
        }
        record(&self.log, format!("start {}", self.label));
        Ok(())
    }

    async fn stop(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        record(&self.log, format!("stop {}", self.label));
        Ok(())
    }

    fn inject(&mut self, _dep: Injected) {
        record(&self.log, format!("inject {}", self.label));
    }

    fn revoke(&mut self, _iface: InterfaceKey, _provider: ServiceId) {
        record(&self.log, format!("revoke {}", self.label));
    }

    fn capability(&self, iface: &InterfaceKey) -> Option<Capability> {
        self.capability
            .as_ref()
            .filter(|(key, _)| key == iface)
            .map(|(_, capability)| capability.clone())
    }
}

fn probe(label: &'static str, log: &Log) -> ServiceSpec {
    let log = log.clone();
    ServiceSpec::new(label, move |_| {
        Box::new(Probe {
            label,
            log: log.clone(),
            capability: None,
            fail_start: false,
        })
    })
}

fn provider_of_a(label: &'static str, log: &Log) -> ServiceSpec {
    let log = log.clone();
    ServiceSpec::new(label, move |_| {
        Box::new(Probe {
            label,
            log: log.clone(),
            capability: Some((InterfaceKey::of::<IfaceA>(), Capability::new(Arc::new(IfaceA)))),
            fail_start: false,
        })
    })
    .provides::<IfaceA>()
}

/// Handler journaling the reason (or kind label) of every event it sees.
struct Tape {
    log: Log,
}

#[async_trait]
impl EventHandler for Tape {
    async fn on_event(
        &self,
        event: &Event,
        _ctx: &HandlerContext,
    ) -> Result<HandlerFlow, ServiceError> {
        let entry = event
            .reason
            .as_deref()
            .unwrap_or(event.kind.as_label())
            .to_string();
        record(&self.log, entry);
        Ok(HandlerFlow::Continue)
    }

    fn name(&self) -> &'static str {
        "Tape"
    }
}

#[tokio::test]
async fn required_dependency_gates_start_and_orders_stop() {
    init_tracing();
    let log = new_log();
    let mut registry = ServiceRegistry::new(RegistryConfig::default());

    // Install order must not matter: the dependent comes first.
    let dependent = registry.create(probe("dependent", &log).requires::<IfaceA>());
    let provider = registry.create(provider_of_a("provider", &log));
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();

    assert_eq!(
        entries(&log),
        [
            "start provider",
            "inject dependent",
            "start dependent",
            "stop dependent",
            "revoke dependent",
            "stop provider",
        ]
    );
    assert_eq!(registry.state(dependent), Some(ServiceState::Installed));
    assert_eq!(registry.state(provider), Some(ServiceState::Installed));
}

#[tokio::test]
async fn service_ids_are_unique_and_never_reused() {
    init_tracing();
    let log = new_log();
    let mut registry = ServiceRegistry::new(RegistryConfig::default());
    let a = registry.create(probe("a", &log));
    let b = registry.create(probe("b", &log));
    assert_ne!(a, b);
    assert_ne!(registry.global_id(a), registry.global_id(b));

    registry.uninstall(a).await;
    assert_eq!(registry.state(a), None);
    let c = registry.create(probe("c", &log));
    assert_ne!(c, a);
    assert_ne!(c, b);
}

#[tokio::test]
async fn dispatch_is_priority_ordered_and_fifo_within_a_band() {
    init_tracing();
    let log = new_log();
    let mut registry = ServiceRegistry::new(RegistryConfig::default());
    let _tape = registry.register_handler(
        ServiceId::NONE,
        EventKind::Custom("tick"),
        EventTarget::All,
        Arc::new(Tape { log: log.clone() }),
    );

    // Distinct low priorities stay distinct: 1 dispatches before 5 even
    // though 5 was enqueued first, and the two 1s keep FIFO order.
    registry.push(
        Event::new(EventKind::Custom("tick"))
            .with_priority(5)
            .with_reason("e1"),
    );
    registry.push(
        Event::new(EventKind::Custom("tick"))
            .with_priority(1)
            .with_reason("e2"),
    );
    registry.push(
        Event::new(EventKind::Custom("tick"))
            .with_priority(1)
            .with_reason("e3"),
    );
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();
    assert_eq!(entries(&log), ["e2", "e3", "e1"]);
}

/// Yields once per event, completing on the second pass.
struct Yielder {
    log: Log,
    seen: Mutex<HashSet<u64>>,
}

#[async_trait]
impl EventHandler for Yielder {
    async fn on_event(
        &self,
        event: &Event,
        _ctx: &HandlerContext,
    ) -> Result<HandlerFlow, ServiceError> {
        let reason = event.reason.as_deref().unwrap_or("?");
        let first = self.seen.lock().unwrap().insert(event.seq);
        if first {
            record(&self.log, format!("{reason} pass1"));
            Ok(HandlerFlow::Yield)
        } else {
            record(&self.log, format!("{reason} pass2"));
            Ok(HandlerFlow::Continue)
        }
    }

    fn name(&self) -> &'static str {
        "Yielder"
    }
}

#[tokio::test]
async fn suspended_handlers_resume_fairly_and_fire_completion() {
    init_tracing();
    let log = new_log();
    let done = Arc::new(AtomicBool::new(false));
    let mut registry = ServiceRegistry::new(RegistryConfig::default());

    let _yielder = registry.register_handler(
        ServiceId::NONE,
        EventKind::Custom("job"),
        EventTarget::All,
        Arc::new(Yielder {
            log: log.clone(),
            seen: Mutex::new(HashSet::new()),
        }),
    );
    let _tape = registry.register_handler(
        ServiceId::NONE,
        EventKind::Custom("job"),
        EventTarget::All,
        Arc::new(Tape { log: log.clone() }),
    );

    let done_flag = done.clone();
    registry.push_with_completion(
        Event::new(EventKind::Custom("job")).with_reason("a"),
        move |_event: &Event| {
            done_flag.store(true, Ordering::SeqCst);
        },
    );
    registry.push(Event::new(EventKind::Custom("job")).with_reason("b"));
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();

    // A suspended event re-queues at the back of its band, so the second
    // event runs its first pass before the first event resumes.
    assert_eq!(
        entries(&log),
        ["a pass1", "a", "b pass1", "b", "a pass2", "b pass2"]
    );
    assert!(done.load(Ordering::SeqCst));
}

/// Yields on the first pass and asks its own service to stop, so the
/// stop lands before the resume can run.
struct YieldThenStopSelf {
    log: Log,
    seen: Mutex<HashSet<u64>>,
}

#[async_trait]
impl EventHandler for YieldThenStopSelf {
    async fn on_event(
        &self,
        event: &Event,
        ctx: &HandlerContext,
    ) -> Result<HandlerFlow, ServiceError> {
        let first = self.seen.lock().unwrap().insert(event.seq);
        if first {
            record(&self.log, "pass1");
            ctx.push(Event::new(EventKind::StopService).with_service(ctx.subscriber()));
            Ok(HandlerFlow::Yield)
        } else {
            record(&self.log, "resumed");
            Ok(HandlerFlow::Continue)
        }
    }

    fn name(&self) -> &'static str {
        "YieldThenStopSelf"
    }
}

#[tokio::test]
async fn stopping_a_service_drops_its_suspended_continuations() {
    init_tracing();
    let log = new_log();
    let done = Arc::new(AtomicBool::new(false));
    let mut registry = ServiceRegistry::new(RegistryConfig::default());

    let owner = registry.create(probe("owner", &log));
    let _job = registry.register_handler(
        owner,
        EventKind::Custom("job"),
        EventTarget::All,
        Arc::new(YieldThenStopSelf {
            log: log.clone(),
            seen: Mutex::new(HashSet::new()),
        }),
    );

    let sink = registry.sink();
    let done_flag = done.clone();
    registry.push_with_completion(
        Event::new(EventKind::Custom("job")),
        move |_event: &Event| {
            done_flag.store(true, Ordering::SeqCst);
            sink.push(Event::new(EventKind::Quit));
        },
    );

    registry.start().await.unwrap();

    // The continuation queued by the yield dies with the owner's
    // registrations: "resumed" is never recorded, but the event still
    // completes.
    assert_eq!(entries(&log), ["start owner", "pass1", "stop owner"]);
    assert!(done.load(Ordering::SeqCst));
}

/// Consumes every matching event, stopping propagation.
struct Claimer {
    log: Log,
}

#[async_trait]
impl EventHandler for Claimer {
    async fn on_event(
        &self,
        event: &Event,
        _ctx: &HandlerContext,
    ) -> Result<HandlerFlow, ServiceError> {
        record(
            &self.log,
            format!("claim {}", event.reason.as_deref().unwrap_or("?")),
        );
        Ok(HandlerFlow::Consume)
    }

    fn name(&self) -> &'static str {
        "Claimer"
    }
}

#[tokio::test]
async fn consume_stops_propagation_to_later_handlers() {
    init_tracing();
    let log = new_log();
    let mut registry = ServiceRegistry::new(RegistryConfig::default());

    let _claimer = registry.register_handler(
        ServiceId::NONE,
        EventKind::Custom("claim"),
        EventTarget::All,
        Arc::new(Claimer { log: log.clone() }),
    );
    let _tape = registry.register_handler(
        ServiceId::NONE,
        EventKind::Custom("claim"),
        EventTarget::All,
        Arc::new(Tape { log: log.clone() }),
    );

    registry.push(Event::new(EventKind::Custom("claim")).with_reason("ticket"));
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();

    // The later Tape registration never sees the consumed event.
    assert_eq!(entries(&log), ["claim ticket"]);
}

#[tokio::test]
async fn tracker_creates_one_instance_per_scope() {
    init_tracing();
    let log = new_log();
    let made = Arc::new(AtomicUsize::new(0));
    let mut registry = ServiceRegistry::new(RegistryConfig::default());

    let made_counter = made.clone();
    let factory_log = log.clone();
    registry.register_tracker::<IfaceDb>(
        ServiceId::NONE,
        Some("region"),
        Box::new(compvisor::ScopedTracker::new(move |scope| {
            made_counter.fetch_add(1, Ordering::SeqCst);
            let log = factory_log.clone();
            ServiceSpec::new(format!("db-{scope}"), move |_| {
                Box::new(Probe {
                    label: "db",
                    log: log.clone(),
                    capability: Some((
                        InterfaceKey::of::<IfaceDb>(),
                        Capability::new(Arc::new(IfaceDb)),
                    )),
                    fail_start: false,
                })
            })
            .provides::<IfaceDb>()
        })),
    );

    registry.create(
        probe("consumer1", &log)
            .requires::<IfaceDb>()
            .with_properties(PropertyBag::new().with("region", "eu")),
    );
    registry.create(
        probe("consumer2", &log)
            .requires::<IfaceDb>()
            .with_properties(PropertyBag::new().with("region", "eu")),
    );
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();

    // Same scope: one instance serves both consumers.
    assert_eq!(made.load(Ordering::SeqCst), 1);
    let seen = entries(&log);
    assert!(seen.contains(&"start db".to_string()));
    assert!(seen.contains(&"start consumer1".to_string()));
    assert!(seen.contains(&"start consumer2".to_string()));
}

#[tokio::test]
async fn circular_required_dependencies_fail_instead_of_deadlocking() {
    struct IfaceX;
    struct IfaceY;

    init_tracing();
    let log = new_log();
    let failures = new_log();
    let mut registry = ServiceRegistry::new(RegistryConfig::default());
    let _tape = registry.register_handler(
        ServiceId::NONE,
        EventKind::ServiceFailed,
        EventTarget::All,
        Arc::new(Tape {
            log: failures.clone(),
        }),
    );

    let x = registry.create(probe("x", &log).provides::<IfaceX>().requires::<IfaceY>());
    let y = registry.create(probe("y", &log).provides::<IfaceY>().requires::<IfaceX>());
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();

    let reported = entries(&failures);
    assert_eq!(
        reported
            .iter()
            .filter(|reason| reason.as_str() == "circular dependency")
            .count(),
        2
    );
    // Neither side ever started.
    assert!(entries(&log).is_empty());
    assert_eq!(registry.state(x), Some(ServiceState::Installed));
    assert_eq!(registry.state(y), Some(ServiceState::Installed));
}

#[tokio::test]
async fn failed_start_leaves_the_service_installed() {
    init_tracing();
    let log = new_log();
    let failures = new_log();
    let mut registry = ServiceRegistry::new(RegistryConfig::default());
    let _tape = registry.register_handler(
        ServiceId::NONE,
        EventKind::ServiceFailed,
        EventTarget::All,
        Arc::new(Tape {
            log: failures.clone(),
        }),
    );

    let failing_log = log.clone();
    let id = registry.create(ServiceSpec::new("flaky", move |_| {
        Box::new(Probe {
            label: "flaky",
            log: failing_log.clone(),
            capability: None,
            fail_start: true,
        })
    }));
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();

    assert_eq!(registry.state(id), Some(ServiceState::Installed));
    assert_eq!(entries(&failures), ["error: boom"]);
}

/// Start fails on a typed property read; the error surfaces as a config
/// failure.
struct NeedsAddress;

#[async_trait]
impl Service for NeedsAddress {
    async fn start(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        let _address = ctx.properties().get_str("address")?;
        Ok(())
    }

    async fn stop(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[tokio::test]
async fn missing_property_is_a_start_failure() {
    init_tracing();
    let failures = new_log();
    let mut registry = ServiceRegistry::new(RegistryConfig::default());
    let _tape = registry.register_handler(
        ServiceId::NONE,
        EventKind::ServiceFailed,
        EventTarget::All,
        Arc::new(Tape {
            log: failures.clone(),
        }),
    );

    let id = registry.create(ServiceSpec::new("host", |_| Box::new(NeedsAddress)));
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();

    assert_eq!(registry.state(id), Some(ServiceState::Installed));
    let reported = entries(&failures);
    assert_eq!(reported.len(), 1);
    assert!(reported[0].contains("address"));
}

#[tokio::test]
async fn unrecoverable_error_forces_the_service_into_unknown() {
    init_tracing();
    let log = new_log();
    let mut registry = ServiceRegistry::new(RegistryConfig::default());
    let id = registry.create(probe("victim", &log));
    registry.push(
        Event::new(EventKind::UnrecoverableError)
            .with_service(id)
            .with_reason("disk gone"),
    );
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();

    assert_eq!(registry.state(id), Some(ServiceState::Unknown));
    assert_eq!(entries(&log), ["start victim", "stop victim"]);
}

#[tokio::test]
async fn unrecoverable_error_for_an_inactive_service_is_ignored() {
    init_tracing();
    let log = new_log();
    let mut registry = ServiceRegistry::new(RegistryConfig::default());

    // Never starts: its required interface has no provider.
    let id = registry.create(probe("idle", &log).requires::<IfaceA>());
    registry.push(
        Event::new(EventKind::UnrecoverableError)
            .with_service(id)
            .with_reason("spurious"),
    );
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();

    // Only an Active service is forced into Unknown; this one stays
    // Installed and restartable.
    assert_eq!(registry.state(id), Some(ServiceState::Installed));
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn handler_errors_reach_the_kind_error_callback() {
    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn on_event(
            &self,
            _event: &Event,
            _ctx: &HandlerContext,
        ) -> Result<HandlerFlow, ServiceError> {
            Err(ServiceError::failed("handler broke"))
        }
    }

    init_tracing();
    let log = new_log();
    let mut registry = ServiceRegistry::new(RegistryConfig::default());
    let _handler = registry.register_handler(
        ServiceId::NONE,
        EventKind::Custom("x"),
        EventTarget::All,
        Arc::new(Failing),
    );
    let callback_log = log.clone();
    registry.set_error_callback(
        EventKind::Custom("x"),
        Arc::new(move |_event, error| {
            record(&callback_log, format!("cb {}", error.as_label()));
        }),
    );

    registry.push(Event::new(EventKind::Custom("x")));
    registry.push(Event::new(EventKind::Quit));

    registry.start().await.unwrap();
    assert_eq!(entries(&log), ["cb service_failed"]);
}

struct SlowStop;

#[async_trait]
impl Service for SlowStop {
    async fn start(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn stop(&mut self, _ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn quit_reports_services_exceeding_the_stop_grace() {
    init_tracing();
    let mut registry = ServiceRegistry::new(RegistryConfig {
        stop_grace: Duration::from_millis(50),
        ..Default::default()
    });
    let id = registry.create(ServiceSpec::new("slow", |_| Box::new(SlowStop)));
    registry.push(Event::new(EventKind::Quit));

    let error = registry.start().await.unwrap_err();
    match error {
        RuntimeError::GraceExceeded { stuck, grace } => {
            assert_eq!(stuck, ["slow"]);
            assert_eq!(grace, Duration::from_millis(50));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.state(id), Some(ServiceState::Unknown));
}
