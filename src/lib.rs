//! # compvisor - in-process component runtime
//!
//! A lightweight runtime for building applications out of **services**:
//! lifecycle-managed components that declare the interfaces they provide
//! and depend on, get their dependencies injected, and communicate
//! through priority-ordered events.
//!
//! ## Architecture
//! ```text
//! ServiceSpec ──► ServiceRegistry::create ──► entity table (Installed)
//!                                                   │
//!                      satisfaction pass ◄──────────┘
//!                      (required deps Active?)
//!                            │ inject → start()
//!                            ▼
//!                          Active ──► capabilities injectable
//!
//! events:  EventSink (any thread) ──► priority queue ──► handlers
//!              ▲                          │ control band first,
//!              │                          │ FIFO within a band
//!   RegistryChannel (fan-out         HandlerFlow::Yield → cooperative
//!   across registries)               suspension, resumed fairly
//!
//! demand:  unmet required interface ──► DependencyTracker ──► create
//!          last consumer gone       ──► undo              ──► uninstall
//! ```
//!
//! ## Core concepts
//! - [`Service`]: lifecycle trait (`start`/`stop`, `inject`/`revoke`,
//!   `capability`), driven only by the owning registry's scheduler.
//! - [`ServiceSpec`]: factory + provided interfaces + required/optional
//!   dependency declarations + [`PropertyBag`] configuration.
//! - [`ServiceRegistry`]: owns the entity table, dependency graph, and
//!   event loop for one execution context (conventionally one per
//!   thread). Cross-thread access goes through [`EventSink`] only.
//! - [`EventHandler`]: event processing with cooperative suspension
//!   ([`HandlerFlow::Yield`]) and propagation control.
//! - [`DependencyTracker`] / [`ScopedTracker`]: on-demand creation of
//!   provider instances, refcounted per scope.
//! - [`RegistryChannel`]: non-blocking event fan-out across registries.
//!
//! ## Guarantees
//! - A service is `Active` only while **every** required dependency is
//!   `Active`; dependents stop before their providers (reverse
//!   topological order).
//! - Events dispatch by `(priority, enqueue order)`: lower priority value
//!   first, FIFO within a band; control events occupy a reserved band.
//! - Required-dependency cycles are detected and fail the implicated
//!   services instead of deadlocking.
//! - Quit drains already-enqueued events, then stops everything within
//!   [`RegistryConfig::stop_grace`] per service.
//!
//! ## Example
//! ```rust,no_run
//! use compvisor::{PropertyBag, RegistryConfig, ServiceRegistry, ServiceSpec};
//! # use async_trait::async_trait;
//! # use compvisor::{Service, ServiceContext, ServiceError};
//! # struct Codec;
//! # struct CodecService;
//! # #[async_trait]
//! # impl Service for CodecService {
//! #     async fn start(&mut self, _: &mut ServiceContext<'_>) -> Result<(), ServiceError> { Ok(()) }
//! #     async fn stop(&mut self, _: &mut ServiceContext<'_>) -> Result<(), ServiceError> { Ok(()) }
//! # }
//! # struct HostService;
//! # #[async_trait]
//! # impl Service for HostService {
//! #     async fn start(&mut self, _: &mut ServiceContext<'_>) -> Result<(), ServiceError> { Ok(()) }
//! #     async fn stop(&mut self, _: &mut ServiceContext<'_>) -> Result<(), ServiceError> { Ok(()) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), compvisor::RuntimeError> {
//!     let mut registry = ServiceRegistry::new(RegistryConfig::default());
//!
//!     registry.create(ServiceSpec::new("codec", |_| Box::new(CodecService)).provides::<Codec>());
//!     registry.create(
//!         ServiceSpec::new("tcp-host", |_| Box::new(HostService))
//!             .requires::<Codec>()
//!             .with_properties(PropertyBag::new().with("address", "0.0.0.0:8001")),
//!     );
//!
//!     compvisor::quit_on_signal(registry.sink());
//!     registry.start().await
//! }
//! ```
//!
//! ## Features
//! - `logging`: exposes [`LogWriter`], a stdout event printer for demos
//!   and tests.

mod channel;
mod core;
mod error;
mod events;
mod properties;
mod tracker;

pub use channel::RegistryChannel;
pub use crate::core::{
    quit_on_signal, wait_for_signal, Capability, Injected, InterfaceKey, RegistryConfig, Service,
    ServiceContext, ServiceFactory, ServiceId, ServiceRegistry, ServiceSpec, ServiceState,
};
pub use error::{PropertyError, RuntimeError, ServiceError};
pub use events::{
    CompletionCallback, ErrorCallback, Event, EventHandler, EventKind, EventSink, EventTarget,
    HandlerContext, HandlerFlow, Payload, Registration, RegistrationId, RegistryId,
    CONTROL_BAND_MAX, PRIORITY_CONTROL, PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_NORMAL,
};
#[cfg(feature = "logging")]
pub use events::LogWriter;
pub use properties::{PropertyBag, PropertyValue};
pub use tracker::{Demand, DependencyTracker, ScopedTracker};
