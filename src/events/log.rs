//! # LogWriter - simple event printer
//!
//! A minimal handler that prints incoming [`Event`]s to stdout.
//! Use it for tests or demos; register it for the kinds you care about.
//!
//! ## Example output
//! ```text
//! [service-installed] service=Some(ServiceId(3)) name=Some("tcp-host")
//! [service-started] service=Some(ServiceId(3)) name=Some("tcp-host")
//! [service-failed] service=Some(ServiceId(4)) reason=Some("circular dependency")
//! [quit]
//! ```

use async_trait::async_trait;

use crate::error::ServiceError;

use super::event::{Event, EventKind};
use super::handler::{EventHandler, HandlerContext, HandlerFlow};

/// Event printer handler.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Constructs a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler for LogWriter {
    async fn on_event(
        &self,
        e: &Event,
        _ctx: &HandlerContext,
    ) -> Result<HandlerFlow, ServiceError> {
        match e.kind {
            EventKind::Quit => println!("[quit]"),
            EventKind::ServiceFailed => {
                println!(
                    "[service-failed] service={:?} name={:?} reason={:?}",
                    e.service, e.name, e.reason
                );
            }
            EventKind::RecoverableError | EventKind::UnrecoverableError => {
                println!(
                    "[{}] origin={:?} reason={:?}",
                    e.kind.as_label(),
                    e.origin,
                    e.reason
                );
            }
            EventKind::DependencyRequest | EventKind::DependencyUndoRequest => {
                println!(
                    "[{}] iface={:?} scope={:?}",
                    e.kind.as_label(),
                    e.iface,
                    e.scope
                );
            }
            _ => {
                println!(
                    "[{}] service={:?} name={:?}",
                    e.kind.as_label(),
                    e.service,
                    e.name
                );
            }
        }
        Ok(HandlerFlow::Continue)
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
