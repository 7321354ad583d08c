//! # Dependency graph queries over the service entity table.
//!
//! The entity table itself is owned and mutated only by the registry's
//! scheduler; this module provides a read-only [`GraphView`] computing the
//! derived topology:
//!
//! - which `Active` services provide a given interface,
//! - which installed services are start-eligible (every required
//!   dependency `Active`),
//! - the reverse-topological stop order for a target service and the
//!   dependents that would lose their last provider,
//! - circular required-dependency detection among waiting services.
//!
//! ## Rules
//! - Edges are derived from interface declarations, not stored: a
//!   dependent declaring interface `I` has an edge to every provider
//!   of `I` (fan-in is allowed; a required dependency is met while at
//!   least one provider is `Active`).
//! - Cycle detection runs on an arena of integer indices (Tarjan SCC)
//!   over *waiting* services only: installed, unblocked, with unmet
//!   required interfaces whose candidate providers are also waiting.

use std::collections::HashMap;

use super::service::{InterfaceKey, ServiceEntity, ServiceId, ServiceState};

/// Read-only topology queries over a registry's entity table.
pub(crate) struct GraphView<'a> {
    entities: &'a HashMap<ServiceId, ServiceEntity>,
    /// Install order, for deterministic iteration.
    order: &'a [ServiceId],
}

impl<'a> GraphView<'a> {
    pub(crate) fn new(
        entities: &'a HashMap<ServiceId, ServiceEntity>,
        order: &'a [ServiceId],
    ) -> Self {
        Self { entities, order }
    }

    fn get(&self, id: ServiceId) -> Option<&ServiceEntity> {
        self.entities.get(&id)
    }

    /// `Active` providers of the interface, in install order.
    pub(crate) fn active_providers(&self, iface: &InterfaceKey) -> Vec<ServiceId> {
        self.order
            .iter()
            .filter_map(|id| self.get(*id))
            .filter(|e| e.is_active() && e.provides.contains(iface))
            .map(|e| e.id)
            .collect()
    }

    /// Required interfaces of `id` with no `Active` provider.
    pub(crate) fn unmet_required(&self, id: ServiceId) -> Vec<InterfaceKey> {
        let Some(entity) = self.get(id) else {
            return Vec::new();
        };
        entity
            .requires
            .iter()
            .filter(|iface| self.active_providers(iface).is_empty())
            .copied()
            .collect()
    }

    /// Installed, unblocked services whose required set is fully met,
    /// in install order.
    pub(crate) fn start_candidates(&self) -> Vec<ServiceId> {
        self.order
            .iter()
            .filter_map(|id| self.get(*id))
            .filter(|e| e.state == ServiceState::Installed && !e.blocked)
            .filter(|e| {
                e.requires
                    .iter()
                    .all(|iface| !self.active_providers(iface).is_empty())
            })
            .map(|e| e.id)
            .collect()
    }

    /// Computes the set of services that must stop when `target` stops,
    /// ordered dependents-first (reverse topological), ending with
    /// `target` itself.
    ///
    /// An `Active` dependent joins the set when one of its required
    /// interfaces would lose its **last** `Active` provider to the set.
    pub(crate) fn stop_order(&self, target: ServiceId) -> Vec<ServiceId> {
        let mut set: Vec<ServiceId> = vec![target];

        // Closure: grow until no more dependents lose their last provider.
        loop {
            let mut grew = false;
            for id in self.order {
                let Some(entity) = self.get(*id) else {
                    continue;
                };
                if !entity.is_active() || set.contains(id) {
                    continue;
                }
                let loses_required = entity.requires.iter().any(|iface| {
                    let providers = self.active_providers(iface);
                    !providers.is_empty() && providers.iter().all(|p| set.contains(p))
                });
                if loses_required {
                    set.push(*id);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        // Order the set dependents-first: repeatedly emit members no
        // remaining member requires-depends on.
        let mut remaining = set;
        let mut ordered = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let pick = remaining
                .iter()
                .position(|candidate| {
                    let Some(provider) = self.get(*candidate) else {
                        return true;
                    };
                    !remaining.iter().any(|other| {
                        if other == candidate {
                            return false;
                        }
                        self.get(*other).is_some_and(|dep| {
                            dep.requires
                                .iter()
                                .any(|iface| provider.provides.contains(iface))
                        })
                    })
                })
                // A required-edge cycle among Active services cannot be
                // built (cycles are rejected before start); fall back to
                // the first member rather than looping.
                .unwrap_or(0);
            ordered.push(remaining.remove(pick));
        }
        ordered
    }

    /// `Active` dependents of `provider` that currently have one of its
    /// interfaces injected (required or optional), in install order.
    pub(crate) fn injected_dependents(&self, provider: ServiceId) -> Vec<ServiceId> {
        self.order
            .iter()
            .filter_map(|id| self.get(*id))
            .filter(|e| e.injected.iter().any(|(_, p)| *p == provider))
            .map(|e| e.id)
            .collect()
    }

    /// Detects required-dependency cycles among waiting services.
    ///
    /// Returns the ids of every service sitting on a cycle. Waiting means
    /// installed, unblocked, with at least one unmet required interface.
    pub(crate) fn detect_required_cycles(&self) -> Vec<ServiceId> {
        // Arena of waiting services.
        let waiting: Vec<ServiceId> = self
            .order
            .iter()
            .filter_map(|id| self.get(*id))
            .filter(|e| e.state == ServiceState::Installed && !e.blocked)
            .filter(|e| !self.unmet_required(e.id).is_empty())
            .map(|e| e.id)
            .collect();

        let index: HashMap<ServiceId, usize> = waiting
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        // Edge dependent -> waiting candidate provider of an unmet iface.
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); waiting.len()];
        for (i, id) in waiting.iter().enumerate() {
            for iface in self.unmet_required(*id) {
                for candidate in &waiting {
                    if candidate == id {
                        continue;
                    }
                    let provides = self
                        .get(*candidate)
                        .is_some_and(|e| e.provides.contains(&iface));
                    if provides {
                        edges[i].push(index[candidate]);
                    }
                }
            }
        }

        let mut tarjan = Tarjan::new(waiting.len(), &edges);
        tarjan.run();

        let mut cyclic = Vec::new();
        for component in tarjan.components {
            let is_cycle = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&n| edges[n].contains(&n));
            if is_cycle {
                cyclic.extend(component.into_iter().map(|n| waiting[n]));
            }
        }
        cyclic.sort_unstable();
        cyclic
    }
}

/// Iterative Tarjan strongly-connected components over an index arena.
struct Tarjan<'g> {
    edges: &'g [Vec<usize>],
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    counter: usize,
    components: Vec<Vec<usize>>,
}

impl<'g> Tarjan<'g> {
    fn new(n: usize, edges: &'g [Vec<usize>]) -> Self {
        Self {
            edges,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            counter: 0,
            components: Vec::new(),
        }
    }

    fn run(&mut self) {
        for v in 0..self.index.len() {
            if self.index[v].is_none() {
                self.visit(v);
            }
        }
    }

    fn visit(&mut self, root: usize) {
        // Explicit frame stack: (node, next edge offset).
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        loop {
            let Some(&(v, next)) = frames.last() else {
                break;
            };
            if next == 0 && self.index[v].is_none() {
                self.index[v] = Some(self.counter);
                self.lowlink[v] = self.counter;
                self.counter += 1;
                self.stack.push(v);
                self.on_stack[v] = true;
            }
            match self.edges[v].get(next).copied() {
                Some(w) => {
                    if let Some(frame) = frames.last_mut() {
                        frame.1 += 1;
                    }
                    match self.index[w] {
                        None => frames.push((w, 0)),
                        Some(widx) => {
                            if self.on_stack[w] {
                                self.lowlink[v] = self.lowlink[v].min(widx);
                            }
                        }
                    }
                }
                None => {
                    frames.pop();
                    if let Some(&(parent, _)) = frames.last() {
                        self.lowlink[parent] = self.lowlink[parent].min(self.lowlink[v]);
                    }
                    if Some(self.lowlink[v]) == self.index[v] {
                        let mut component = Vec::new();
                        while let Some(w) = self.stack.pop() {
                            self.on_stack[w] = false;
                            component.push(w);
                            if w == v {
                                break;
                            }
                        }
                        self.components.push(component);
                    }
                }
            }
        }
    }
}
