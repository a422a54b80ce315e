//! Nullary functions: a single atomic ob slot.

use core::sync::atomic::Ordering::{Acquire, Relaxed};
use std::sync::Arc;

use crate::event::{Event, EventSink};
use crate::{AtomicOb, Carrier, Handle, Ob};

pub struct NullaryFunction {
    carrier: Arc<Carrier>,
    value: AtomicOb,
    handle: Handle,
    sink: Arc<dyn EventSink>,
}

impl NullaryFunction {
    pub fn new(carrier: Arc<Carrier>, handle: Handle, sink: Arc<dyn EventSink>) -> Self {
        Self {
            carrier,
            value: AtomicOb::new(0),
            handle,
            sink,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn defined(&self) -> bool {
        self.find() != 0
    }

    /// Returns the value, or 0 when undefined.
    pub fn find(&self) -> Ob {
        self.value.load(Acquire)
    }

    /// Installs `val`, or merges it with the existing value; emits the
    /// event exactly when the slot transitions from empty to defined.
    pub fn insert(&self, val: Ob) {
        debug_assert_ne!(val, 0, "tried to set value to zero");
        if self.carrier.set_and_merge(&self.value, val) {
            self.sink.notify(Event::NullaryFunction(self.handle));
        }
    }

    pub fn raw_insert(&self, val: Ob) {
        self.value.store(val, Relaxed);
    }

    pub fn clear(&self) {
        self.value.store(0, Relaxed);
    }

    /// Rewrites the value in place when it equals `dep`.
    pub fn unsafe_merge(&self, dep: Ob) {
        if self.value.load(Relaxed) == dep {
            self.value.store(self.carrier.find(dep), Relaxed);
        }
    }

    pub fn validate(&self) {
        let val = self.find();
        if val != 0 {
            assert!(
                self.carrier.contains(val),
                "nullary function holds unsupported value: {val}"
            );
        }
    }
}
