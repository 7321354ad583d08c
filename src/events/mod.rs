//! Runtime events: data model, priority queue, handlers, and sinks.
//!
//! This module groups the event **data model** and the dispatch plumbing
//! used by a registry's scheduler.
//!
//! ## Contents
//! - [`Event`], [`EventKind`] event classification and payload metadata
//! - priority bands ([`PRIORITY_CONTROL`] .. [`PRIORITY_LOW`])
//! - [`EventHandler`], [`HandlerFlow`], [`HandlerContext`] dispatch surface
//! - [`Registration`], [`EventTarget`] handler registration records
//! - [`CompletionCallback`], [`ErrorCallback`] per-instance / per-kind hooks
//! - [`EventSink`] non-blocking cross-thread intake
//!
//! ## Quick reference
//! - **Publishers**: services (via their context or a cloned sink),
//!   handlers (via [`HandlerContext::push`]), the registry itself
//!   (lifecycle notifications), the cross-registry channel.
//! - **Consumers**: the owning registry's scheduler loop, which dispatches
//!   to matching registrations and trackers in priority order.

mod event;
mod handler;
#[cfg(feature = "logging")]
mod log;
mod queue;
mod sink;

pub use event::{
    Event, EventKind, Payload, CONTROL_BAND_MAX, PRIORITY_CONTROL, PRIORITY_HIGH, PRIORITY_LOW,
    PRIORITY_NORMAL,
};
pub use handler::{
    CompletionCallback, ErrorCallback, EventHandler, EventTarget, HandlerContext, HandlerFlow,
    Registration, RegistrationId,
};
#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use sink::{EventSink, RegistryId};

pub(crate) use handler::HandlerRegistration;
pub(crate) use queue::{EventQueue, Work};
