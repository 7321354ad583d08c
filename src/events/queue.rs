//! # Stable priority queue of pending scheduler work.
//!
//! The queue orders entries by `(priority, enqueue order)`: lower priority
//! values pop first, and entries of equal priority pop in FIFO order. The
//! enqueue order is a per-queue counter, not the global event `seq`: a
//! suspended handler that is re-queued gets a fresh order value, which
//! places it at the back of its priority band (FIFO fairness among
//! suspended handlers).
//!
//! ## Entries
//! - [`Work::Dispatch`]: a freshly enqueued event, dispatched to every
//!   matching registration.
//! - [`Work::Resume`]: a pass over handlers that previously yielded for
//!   one event instance, in their original relative order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::event::Event;
use super::handler::RegistrationId;

/// One unit of scheduler work.
pub(crate) enum Work {
    /// Dispatch a fresh event to all matching registrations.
    Dispatch(Event),
    /// Resume handlers that yielded on this event, in order.
    Resume {
        /// The event instance being resumed.
        event: Event,
        /// Registrations still to be re-invoked, in yield order.
        pending: Vec<RegistrationId>,
    },
}

impl Work {
    pub(crate) fn event(&self) -> &Event {
        match self {
            Work::Dispatch(ev) => ev,
            Work::Resume { event, .. } => event,
        }
    }
}

struct Entry {
    priority: u16,
    order: u64,
    work: Work,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.order == other.order
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; invert so the lowest (priority, order)
    // pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.order).cmp(&(self.priority, self.order))
    }
}

/// Priority queue with stable FIFO ordering inside each priority band.
#[derive(Default)]
pub(crate) struct EventQueue {
    heap: BinaryHeap<Entry>,
    next_order: u64,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueues work at the given effective priority, at the back of its
    /// band.
    pub(crate) fn push(&mut self, priority: u16, work: Work) {
        let order = self.next_order;
        self.next_order += 1;
        self.heap.push(Entry {
            priority,
            order,
            work,
        });
    }

    /// Enqueues a fresh event at the event's own priority.
    pub(crate) fn push_event(&mut self, event: Event) {
        self.push(event.priority, Work::Dispatch(event));
    }

    /// Pops the highest-priority (oldest at equal priority) work item.
    pub(crate) fn pop(&mut self) -> Option<Work> {
        self.heap.pop().map(|e| e.work)
    }
}
