//! Core runtime: service model, dependency graph, registry scheduler.
//!
//! ## Contents
//! - [`Service`], [`ServiceSpec`], [`ServiceContext`] lifecycle surface
//! - [`ServiceId`], [`ServiceState`], [`InterfaceKey`] identity & typing
//! - [`Capability`], [`Injected`] the injection protocol's data carriers
//! - [`ServiceRegistry`], [`RegistryConfig`] container and scheduler
//! - [`wait_for_signal`], [`quit_on_signal`] process signal integration

mod config;
mod graph;
mod registry;
mod service;
mod shutdown;

pub use config::RegistryConfig;
pub use registry::ServiceRegistry;
pub use service::{
    Capability, Injected, InterfaceKey, Service, ServiceContext, ServiceFactory, ServiceId,
    ServiceSpec, ServiceState,
};
pub use shutdown::{quit_on_signal, wait_for_signal};

pub(crate) use graph::GraphView;
pub(crate) use service::ServiceEntity;
