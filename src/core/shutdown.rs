//! # Process signal integration.
//!
//! Bridges OS shutdown signals to the runtime's quit semantics: a quit
//! request drains the already-enqueued events, stops every `Active`
//! service in reverse-dependency order, and lets `Registry::start`
//! return.
//!
//! On Unix `SIGINT`, `SIGTERM` and `SIGQUIT` are honored; elsewhere
//! only `Ctrl+C`.

use crate::events::{Event, EventKind, EventSink};

/// Waits for a shutdown signal (`SIGINT`/`SIGTERM`/`SIGQUIT` on Unix,
/// `Ctrl+C` otherwise).
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut term, mut quit) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::quit()),
        ) {
            (Ok(term), Ok(quit)) => (term, quit),
            _ => {
                tracing::warn!("failed to install signal handlers");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
            _ = quit.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Spawns a task that pushes a quit event into the registry on the first
/// shutdown signal.
///
/// ```rust,no_run
/// use compvisor::{quit_on_signal, RegistryConfig, ServiceRegistry};
///
/// # async fn run() -> Result<(), compvisor::RuntimeError> {
/// let mut registry = ServiceRegistry::new(RegistryConfig::default());
/// quit_on_signal(registry.sink());
/// registry.start().await
/// # }
/// ```
pub fn quit_on_signal(sink: EventSink) {
    tokio::spawn(async move {
        wait_for_signal().await;
        sink.push(Event::new(EventKind::Quit).with_reason("signal"));
    });
}
