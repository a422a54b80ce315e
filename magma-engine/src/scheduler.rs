//! Task queues: one FIFO per task kind with concurrent push and try-pop.
//!
//! The queues are the engine's [`EventSink`]: every table event becomes a
//! pending task. Deduplication is not required because rules are
//! idempotent; merge cancellation scans the queues and drops tasks that
//! reference the demoted ob.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use magma_core::{Event, EventSink, Handle, Ob};

/// An event task popped for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventTask {
    Exists(Ob),
    UnaryRelation(Handle, Ob),
    PositiveOrder(Handle, Ob, Ob),
    NegativeOrder(Handle, Ob, Ob),
    BinaryRelation(Handle, Ob, Ob),
    NullaryFunction(Handle),
    InjectiveFunction(Handle, Ob),
    BinaryFunction(Handle, Ob, Ob),
    SymmetricFunction(Handle, Ob, Ob),
}

#[derive(Default)]
pub(crate) struct EventQueues {
    merge: Mutex<VecDeque<Ob>>,
    exists: Mutex<VecDeque<Ob>>,
    unary_relation: Mutex<VecDeque<(Handle, Ob)>>,
    positive_order: Mutex<VecDeque<(Handle, Ob, Ob)>>,
    negative_order: Mutex<VecDeque<(Handle, Ob, Ob)>>,
    binary_relation: Mutex<VecDeque<(Handle, Ob, Ob)>>,
    nullary_function: Mutex<VecDeque<Handle>>,
    injective_function: Mutex<VecDeque<(Handle, Ob)>>,
    binary_function: Mutex<VecDeque<(Handle, Ob, Ob)>>,
    symmetric_function: Mutex<VecDeque<(Handle, Ob, Ob)>>,
    /// Handles of the distinguished `LESS` / `NLESS` relations, when
    /// declared; their events route to the order queues.
    order_handles: RwLock<(Option<Handle>, Option<Handle>)>,
    pushes: AtomicU64,
    idle_mutex: Mutex<()>,
    idle_condvar: Condvar,
}

impl EventQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_order_handles(&self, less: Option<Handle>, nless: Option<Handle>) {
        *self.order_handles.write() = (less, nless);
    }

    fn pushed(&self) {
        self.pushes.fetch_add(1, Relaxed);
        self.idle_condvar.notify_one();
    }

    /// Total pushes so far; stable across a cleanup cycle at saturation.
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Relaxed)
    }

    pub fn pop_merge(&self) -> Option<Ob> {
        self.merge.lock().pop_front()
    }

    /// Pops the next event task, function events first.
    pub fn pop_event(&self) -> Option<EventTask> {
        if let Some(ob) = self.exists.lock().pop_front() {
            return Some(EventTask::Exists(ob));
        }
        if let Some(handle) = self.nullary_function.lock().pop_front() {
            return Some(EventTask::NullaryFunction(handle));
        }
        if let Some((handle, key)) = self.injective_function.lock().pop_front() {
            return Some(EventTask::InjectiveFunction(handle, key));
        }
        if let Some((handle, lhs, rhs)) = self.binary_function.lock().pop_front() {
            return Some(EventTask::BinaryFunction(handle, lhs, rhs));
        }
        if let Some((handle, lhs, rhs)) = self.symmetric_function.lock().pop_front() {
            return Some(EventTask::SymmetricFunction(handle, lhs, rhs));
        }
        if let Some((handle, ob)) = self.unary_relation.lock().pop_front() {
            return Some(EventTask::UnaryRelation(handle, ob));
        }
        if let Some((handle, lhs, rhs)) = self.positive_order.lock().pop_front() {
            return Some(EventTask::PositiveOrder(handle, lhs, rhs));
        }
        if let Some((handle, lhs, rhs)) = self.negative_order.lock().pop_front() {
            return Some(EventTask::NegativeOrder(handle, lhs, rhs));
        }
        if let Some((handle, lhs, rhs)) = self.binary_relation.lock().pop_front() {
            return Some(EventTask::BinaryRelation(handle, lhs, rhs));
        }
        None
    }

    /// Whether every non-sample queue is empty, merges included.
    pub fn all_empty(&self) -> bool {
        self.merge.lock().is_empty()
            && self.exists.lock().is_empty()
            && self.unary_relation.lock().is_empty()
            && self.positive_order.lock().is_empty()
            && self.negative_order.lock().is_empty()
            && self.binary_relation.lock().is_empty()
            && self.nullary_function.lock().is_empty()
            && self.injective_function.lock().is_empty()
            && self.binary_function.lock().is_empty()
            && self.symmetric_function.lock().is_empty()
    }

    /// Drops every pending task that references a just-demoted ob; those
    /// tasks are about to become referentially stale.
    pub fn cancel_referencing(&self, dep: Ob) {
        self.exists.lock().retain(|&ob| ob != dep);
        self.unary_relation.lock().retain(|&(_, ob)| ob != dep);
        self.positive_order
            .lock()
            .retain(|&(_, lhs, rhs)| lhs != dep && rhs != dep);
        self.negative_order
            .lock()
            .retain(|&(_, lhs, rhs)| lhs != dep && rhs != dep);
        self.binary_relation
            .lock()
            .retain(|&(_, lhs, rhs)| lhs != dep && rhs != dep);
        self.injective_function.lock().retain(|&(_, key)| key != dep);
        self.binary_function
            .lock()
            .retain(|&(_, lhs, rhs)| lhs != dep && rhs != dep);
        self.symmetric_function
            .lock()
            .retain(|&(_, lhs, rhs)| lhs != dep && rhs != dep);
    }

    pub fn idle_wait(&self, timeout: Duration) {
        let mut guard = self.idle_mutex.lock();
        self.idle_condvar.wait_for(&mut guard, timeout);
    }

    pub fn wake_all(&self) {
        self.idle_condvar.notify_all();
    }
}

impl EventSink for EventQueues {
    fn notify(&self, event: Event) {
        match event {
            Event::Exists(ob) => {
                self.exists.lock().push_back(ob);
            }
            Event::Merge(dep) => {
                self.merge.lock().push_back(dep);
            }
            Event::UnaryRelation(handle, ob) => {
                self.unary_relation.lock().push_back((handle, ob));
            }
            Event::BinaryRelation(handle, lhs, rhs) => {
                let (less, nless) = *self.order_handles.read();
                if Some(handle) == less {
                    self.positive_order.lock().push_back((handle, lhs, rhs));
                } else if Some(handle) == nless {
                    self.negative_order.lock().push_back((handle, lhs, rhs));
                } else {
                    self.binary_relation.lock().push_back((handle, lhs, rhs));
                }
            }
            Event::NullaryFunction(handle) => {
                self.nullary_function.lock().push_back(handle);
            }
            Event::InjectiveFunction(handle, key) => {
                self.injective_function.lock().push_back((handle, key));
            }
            Event::BinaryFunction(handle, lhs, rhs) => {
                self.binary_function.lock().push_back((handle, lhs, rhs));
            }
            Event::SymmetricFunction(handle, lhs, rhs) => {
                self.symmetric_function.lock().push_back((handle, lhs, rhs));
            }
        }
        self.pushed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_route_to_their_queues() {
        let queues = EventQueues::new();
        queues.set_order_handles(Some(0), Some(1));
        queues.notify(Event::BinaryRelation(0, 1, 2));
        queues.notify(Event::BinaryRelation(1, 3, 4));
        queues.notify(Event::BinaryRelation(2, 5, 6));
        assert_eq!(queues.pop_event(), Some(EventTask::PositiveOrder(0, 1, 2)));
        assert_eq!(queues.pop_event(), Some(EventTask::NegativeOrder(1, 3, 4)));
        assert_eq!(queues.pop_event(), Some(EventTask::BinaryRelation(2, 5, 6)));
        assert_eq!(queues.pop_event(), None);
        assert_eq!(queues.pushes(), 3);
    }

    #[test]
    fn function_events_pop_before_relation_events() {
        let queues = EventQueues::new();
        queues.notify(Event::UnaryRelation(0, 7));
        queues.notify(Event::BinaryFunction(0, 1, 2));
        assert_eq!(queues.pop_event(), Some(EventTask::BinaryFunction(0, 1, 2)));
        assert_eq!(queues.pop_event(), Some(EventTask::UnaryRelation(0, 7)));
    }

    #[test]
    fn cancellation_drops_stale_tasks() {
        let queues = EventQueues::new();
        queues.notify(Event::Exists(3));
        queues.notify(Event::Exists(4));
        queues.notify(Event::BinaryFunction(0, 1, 3));
        queues.notify(Event::BinaryFunction(0, 1, 2));
        queues.cancel_referencing(3);
        assert_eq!(queues.pop_event(), Some(EventTask::Exists(4)));
        assert_eq!(queues.pop_event(), Some(EventTask::BinaryFunction(0, 1, 2)));
        assert_eq!(queues.pop_event(), None);
    }
}
