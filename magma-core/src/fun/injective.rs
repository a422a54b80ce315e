//! Injective functions: `values[key] = val` with a maintained inverse
//! `inverse[val] = key` and `defined` / `inverse_defined` bit sets.

use core::sync::atomic::Ordering::{Acquire, Relaxed};
use std::sync::Arc;

use crate::aligned::AlignedBuf;
use crate::dense_set::{DenseSet, SetIter, SetView};
use crate::event::{Event, EventSink};
use crate::{AtomicOb, Carrier, Handle, Ob};

pub struct InjectiveFunction {
    carrier: Arc<Carrier>,
    defined: DenseSet,
    inverse_defined: DenseSet,
    values: AlignedBuf<AtomicOb>,
    inverse: AlignedBuf<AtomicOb>,
    handle: Handle,
    sink: Arc<dyn EventSink>,
}

impl InjectiveFunction {
    pub fn new(carrier: Arc<Carrier>, handle: Handle, sink: Arc<dyn EventSink>) -> Self {
        let item_dim = carrier.item_dim();
        Self {
            carrier,
            defined: DenseSet::new(item_dim),
            inverse_defined: DenseSet::new(item_dim),
            values: AlignedBuf::zeroed(1 + item_dim),
            inverse: AlignedBuf::zeroed(1 + item_dim),
            handle,
            sink,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn defined(&self, key: Ob) -> bool {
        self.defined.contains(key)
    }

    /// Returns `f(key)`, or 0 when undefined.
    pub fn find(&self, key: Ob) -> Ob {
        self.values[key as usize].load(Acquire)
    }

    /// Returns the key mapping to `val`, or 0 when none does.
    pub fn inverse_find(&self, val: Ob) -> Ob {
        self.inverse[val as usize].load(Acquire)
    }

    /// Installs `f(key) = val`, or merges a conflicting value; emits the
    /// event exactly when the forward slot transitions to defined.
    pub fn insert(&self, key: Ob, val: Ob) {
        debug_assert_ne!(val, 0, "tried to set val to zero at {key}");
        debug_assert!(self.carrier.contains(key), "unsupported key: {key}");
        debug_assert!(self.carrier.contains(val), "unsupported val: {val}");

        if self.carrier.set_and_merge(&self.values[key as usize], val) {
            self.defined.insert(key);
            self.sink.notify(Event::InjectiveFunction(self.handle, key));
        }
        if self.carrier.set_and_merge(&self.inverse[val as usize], key) {
            self.inverse_defined.insert(val);
        }
    }

    pub fn raw_insert(&self, key: Ob, val: Ob) {
        self.values[key as usize].store(val, Relaxed);
        self.defined.insert(key);
        self.inverse[val as usize].store(key, Relaxed);
        self.inverse_defined.insert(val);
    }

    pub fn iter(&self) -> SetIter<'_> {
        self.defined.iter()
    }

    pub fn inverse_iter(&self) -> SetIter<'_> {
        self.inverse_defined.iter()
    }

    pub fn defined_view(&self) -> SetView<'_> {
        self.defined.view()
    }

    pub fn inverse_defined_view(&self) -> SetView<'_> {
        self.inverse_defined.view()
    }

    pub fn count_items(&self) -> usize {
        self.defined.count_items()
    }

    pub fn clear(&self) {
        self.defined.clear();
        self.inverse_defined.clear();
        for slot in self.values.iter().chain(self.inverse.iter()) {
            slot.store(0, Relaxed);
        }
    }

    /// Scrubs `dep` from keys and values. Key entries are removed and
    /// re-inserted under the rep; value entries are rewritten in place.
    pub fn unsafe_merge(&self, dep: Ob) {
        let rep = self.carrier.find(dep);
        debug_assert_ne!(rep, dep, "self merge: {dep}");

        // dep as key
        if self.defined.remove(dep) {
            let val = self.values[dep as usize].swap(0, Relaxed);
            debug_assert_ne!(val, 0, "defined key without value: {dep}");
            if self.inverse[val as usize].load(Relaxed) == dep {
                self.inverse[val as usize].store(0, Relaxed);
                self.inverse_defined.remove(val);
            }
            self.insert(rep, self.carrier.find(val));
        }

        // dep as value
        if self.inverse_defined.remove(dep) {
            let key = self.inverse[dep as usize].swap(0, Relaxed);
            if key != 0 && self.values[key as usize].load(Relaxed) == dep {
                self.values[key as usize].store(rep, Relaxed);
                if self.carrier.set_and_merge(&self.inverse[rep as usize], key) {
                    self.inverse_defined.insert(rep);
                }
            }
        }
    }

    pub fn validate(&self) {
        for key in 1..=self.carrier.item_dim() as Ob {
            let val = self.values[key as usize].load(Relaxed);
            let bit = self.defined.contains(key);
            if !self.carrier.contains(key) {
                assert!(val == 0, "unsupported key has value: {key}");
                assert!(!bit, "unsupported key is defined: {key}");
            } else if val != 0 {
                assert!(bit, "valued key not defined: {key}");
                assert!(
                    self.carrier.contains(val),
                    "key {key} maps to unsupported val {val}"
                );
            } else {
                assert!(!bit, "defined key has no value: {key}");
            }
        }
        for val in self.inverse_defined.iter() {
            let key = self.inverse[val as usize].load(Relaxed);
            assert!(key != 0, "inverse-defined val has no key: {val}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullSink;

    fn setup(live: usize) -> (Arc<Carrier>, InjectiveFunction) {
        let carrier = Arc::new(Carrier::new(16, Arc::new(NullSink)));
        for _ in 0..live {
            carrier.try_insert();
        }
        let fun = InjectiveFunction::new(carrier.clone(), 0, Arc::new(NullSink));
        (carrier, fun)
    }

    #[test]
    fn insert_and_lookup_both_ways() {
        let (_carrier, fun) = setup(4);
        fun.insert(1, 3);
        assert_eq!(fun.find(1), 3);
        assert_eq!(fun.inverse_find(3), 1);
        assert_eq!(fun.find(2), 0);
        assert_eq!(fun.iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(fun.inverse_iter().collect::<Vec<_>>(), vec![3]);
        fun.validate();
    }

    #[test]
    fn merge_rewrites_keys_and_values() {
        let (carrier, fun) = setup(4);
        fun.insert(3, 4);
        fun.insert(1, 3);
        carrier.merge(3, 2);
        fun.unsafe_merge(3);
        assert_eq!(fun.find(3), 0);
        assert_eq!(fun.find(2), 4);
        assert_eq!(fun.find(1), 2);
        assert_eq!(fun.inverse_find(2), 1);
        assert_eq!(fun.inverse_find(3), 0);
    }
}
