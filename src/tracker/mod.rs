//! Dependency trackers: on-demand creation of service instances.
//!
//! A tracker inverts the dependency flow: instead of requiring every
//! provider to be installed up front, a service declares a required
//! interface and a registered tracker observes the unmet demand and
//! creates a matching instance on the fly (and destroys it once the last
//! consumer is gone).
//!
//! ## Contents
//! - [`DependencyTracker`] the tracker callback trait
//! - [`Demand`] one observed request/undo
//! - [`ScopedTracker`] a reusable per-scope factory tracker

mod scoped;
mod tracker;

pub use scoped::ScopedTracker;
pub use tracker::{Demand, DependencyTracker};
