//! Cross-registry fan-out through [`RegistryChannel`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use compvisor::{
    Event, EventHandler, EventKind, EventTarget, HandlerContext, HandlerFlow, RegistryChannel,
    RegistryConfig, ServiceError, ServiceId, ServiceRegistry,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Log = Arc<Mutex<Vec<String>>>;

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
        if let Some(reason) = event.reason.as_deref() {
            self.log.lock().unwrap().push(reason.to_string());
        }
        Ok(HandlerFlow::Continue)
    }
}

#[tokio::test]
async fn broadcast_reaches_every_registry() {
    init_tracing();
    let mut first = ServiceRegistry::new(RegistryConfig::default());
    let mut second = ServiceRegistry::new(RegistryConfig::default());
    assert_ne!(first.registry_id(), second.registry_id());

    let log_first: Log = Arc::new(Mutex::new(Vec::new()));
    let log_second: Log = Arc::new(Mutex::new(Vec::new()));
    let _a = first.register_handler(
        ServiceId::NONE,
        EventKind::Custom("ping"),
        EventTarget::All,
        Arc::new(Tape {
            log: log_first.clone(),
        }),
    );
    let _b = second.register_handler(
        ServiceId::NONE,
        EventKind::Custom("ping"),
        EventTarget::All,
        Arc::new(Tape {
            log: log_second.clone(),
        }),
    );

    let channel = RegistryChannel::new();
    channel.add_registry(&first);
    channel.add_registry(&second);
    assert_eq!(channel.len(), 2);

    channel.broadcast(Event::new(EventKind::Custom("ping")).with_reason("hello"));
    channel.broadcast(Event::new(EventKind::Quit));

    let (first_result, second_result) = tokio::join!(first.start(), second.start());
    first_result.unwrap();
    second_result.unwrap();

    assert_eq!(*log_first.lock().unwrap(), ["hello"]);
    assert_eq!(*log_second.lock().unwrap(), ["hello"]);
}

#[tokio::test]
async fn removed_registries_stop_receiving() {
    init_tracing();
    let first = ServiceRegistry::new(RegistryConfig::default());
    let channel = RegistryChannel::new();
    channel.add_registry(&first);
    channel.remove_registry(first.registry_id());
    assert!(channel.is_empty());

    // Broadcasting into an empty channel is a no-op, not an error.
    channel.broadcast(Event::new(EventKind::Custom("ping")));
}
