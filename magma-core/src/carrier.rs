//! The carrier: ordered universe of live obs with a union-find forest.
//!
//! `reps` maps every live ob to its current representative, with
//! `reps[rep] == rep` and `rep <= ob`; removed obs map to 0. Merges install
//! union-find edges with a compare-exchange retry loop and stay concurrent
//! with readers; the scheduler separately serializes merge propagation
//! against all other work.

use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use core::sync::atomic::AtomicUsize;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::aligned::AlignedBuf;
use crate::dense_set::{DenseSet, SetIter, SetView};
use crate::event::{Event, EventSink};
use crate::{AtomicOb, Ob};

pub struct Carrier {
    support: DenseSet,
    reps: AlignedBuf<AtomicOb>,
    item_count: AtomicUsize,
    rep_count: AtomicUsize,
    sink: Arc<dyn EventSink>,
    // assert-shared mutex: find and slot writes hold it shared, remove and
    // validation hold it uniquely
    mutex: RwLock<()>,
}

impl Carrier {
    pub fn new(item_dim: usize, sink: Arc<dyn EventSink>) -> Self {
        debug!(item_dim, "creating carrier");
        Self {
            support: DenseSet::new(item_dim),
            reps: AlignedBuf::zeroed(1 + item_dim),
            item_count: AtomicUsize::new(0),
            rep_count: AtomicUsize::new(0),
            sink,
            mutex: RwLock::new(()),
        }
    }

    pub fn item_dim(&self) -> usize {
        self.support.item_dim()
    }

    pub fn item_count(&self) -> usize {
        self.item_count.load(Relaxed)
    }

    pub fn rep_count(&self) -> usize {
        self.rep_count.load(Relaxed)
    }

    pub fn support(&self) -> SetView<'_> {
        self.support.view()
    }

    pub fn contains(&self, ob: Ob) -> bool {
        self.support.contains(ob)
    }

    pub fn is_full(&self) -> bool {
        self.item_count() == self.item_dim()
    }

    pub fn iter(&self) -> SetIter<'_> {
        self.support.iter()
    }

    /// Marks the smallest unused id live, or returns `None` when the
    /// carrier is full.
    pub fn try_insert(&self) -> Option<Ob> {
        let _shared = self.mutex.read();
        let ob = self.support.try_insert_one()?;
        self.reps[ob as usize].store(ob, Release);
        self.item_count.fetch_add(1, Relaxed);
        self.rep_count.fetch_add(1, Relaxed);
        self.sink.notify(Event::Exists(ob));
        Some(ob)
    }

    /// Inserts a known id while loading a snapshot; no events, no counter
    /// upkeep. Call [`Carrier::update_counts`] once loading finishes.
    pub fn raw_insert(&self, ob: Ob) {
        debug_assert!(!self.support.contains(ob), "double insertion: {ob}");
        self.support.insert(ob);
        self.reps[ob as usize].store(ob, Relaxed);
    }

    /// Recomputes `item_count` and `rep_count` from the rep forest.
    pub fn update_counts(&self) {
        let _unique = self.mutex.write();
        let mut items = 0;
        let mut reps = 0;
        for ob in self.support.iter() {
            items += 1;
            if self.reps[ob as usize].load(Relaxed) == ob {
                reps += 1;
            }
        }
        self.item_count.store(items, Relaxed);
        self.rep_count.store(reps, Relaxed);
    }

    /// Returns the canonical representative, path-halving along the way.
    pub fn find(&self, ob: Ob) -> Ob {
        let _shared = self.mutex.read();
        self.find_raw(ob)
    }

    pub(crate) fn find_raw(&self, ob: Ob) -> Ob {
        debug_assert!(self.contains(ob), "find of unsupported ob: {ob}");
        let rep = self.reps[ob as usize].load(Relaxed);
        if rep == ob {
            ob
        } else {
            self.halve(ob, rep)
        }
    }

    fn halve(&self, ob: Ob, rep: Ob) -> Ob {
        let rep_rep = self.find_raw(rep);
        if rep == rep_rep {
            return rep;
        }
        match self.reps[ob as usize].compare_exchange_weak(rep, rep_rep, AcqRel, Acquire)
        {
            Ok(_) => rep_rep,
            Err(_) => rep.min(rep_rep),
        }
    }

    pub fn equal(&self, lhs: Ob, rhs: Ob) -> bool {
        self.find(lhs) == self.find(rhs)
    }

    /// Equates two obs, demoting the larger survivor; returns the winning
    /// rep. A no-op when the ids already coincide.
    pub fn ensure_equal(&self, lhs: Ob, rhs: Ob) -> Ob {
        let _shared = self.mutex.read();
        self.ensure_equal_raw(lhs, rhs)
    }

    fn ensure_equal_raw(&self, lhs: Ob, rhs: Ob) -> Ob {
        if lhs == rhs {
            lhs
        } else {
            self.merge_raw(lhs.max(rhs), lhs.min(rhs))
        }
    }

    /// Installs the union-find edge `dep -> rep` with `dep > rep`, retrying
    /// through intervening merges until the edge lands or collapses.
    /// Emits [`Event::Merge`] once per successful demotion.
    pub fn merge(&self, dep: Ob, rep: Ob) -> Ob {
        let _shared = self.mutex.read();
        self.merge_raw(dep, rep)
    }

    fn merge_raw(&self, mut dep: Ob, mut rep: Ob) -> Ob {
        debug_assert!(dep > rep, "out of order merge: {dep}, {rep}");
        debug_assert!(self.contains(dep), "bad merge dep: {dep}");
        debug_assert!(self.contains(rep), "bad merge rep: {rep}");

        loop {
            match self.reps[dep as usize].compare_exchange_weak(dep, rep, AcqRel, Acquire)
            {
                Ok(_) => break,
                Err(actual) => {
                    dep = actual;
                    rep = self.reps[rep as usize].load(Acquire);
                    if dep == rep {
                        return rep;
                    }
                    if dep < rep {
                        core::mem::swap(&mut dep, &mut rep);
                    }
                }
            }
        }
        self.rep_count.fetch_sub(1, Relaxed);
        self.sink.notify(Event::Merge(dep));
        rep
    }

    /// Atomically installs `source` into an empty slot; on conflict keeps
    /// retrying against the merged winner. Returns whether the slot went
    /// from empty to defined.
    pub fn set_and_merge(&self, destin: &AtomicOb, mut source: Ob) -> bool {
        debug_assert!(self.contains(source), "unsupported source: {source}");
        let _shared = self.mutex.read();
        let mut old = 0;
        loop {
            match destin.compare_exchange(old, source, AcqRel, Acquire) {
                Ok(prior) => return prior == 0,
                Err(actual) => {
                    old = actual;
                    source = self.ensure_equal_raw(source, old);
                    if old == source {
                        return false;
                    }
                }
            }
        }
    }

    /// Atomically installs `source` into an empty slot, or merges it with
    /// the occupant. Returns whether the slot went from empty to defined.
    pub fn set_or_merge(&self, destin: &AtomicOb, source: Ob) -> bool {
        debug_assert!(self.contains(source), "unsupported source: {source}");
        let _shared = self.mutex.read();
        match destin.compare_exchange(0, source, AcqRel, Acquire) {
            Ok(_) => true,
            Err(old) => {
                self.ensure_equal_raw(source, old);
                false
            }
        }
    }

    /// Removes a dead ob after its merge has been propagated through every
    /// table. Preconditions: `ob` is live, and either non-rep or a rep with
    /// no outstanding deps.
    pub fn unsafe_remove(&self, ob: Ob) {
        let _unique = self.mutex.write();
        debug_assert!(self.contains(ob), "double removal: {ob}");
        let rep = self.reps[ob as usize].load(Relaxed);
        debug_assert_ne!(rep, 0, "double removal: {ob}");
        if rep == ob {
            debug_assert!(
                ((ob as usize + 1)..=self.item_dim())
                    .all(|other| self.reps[other].load(Relaxed) != ob),
                "removed rep {ob} before its deps"
            );
            self.rep_count.fetch_sub(1, Relaxed);
        } else {
            // compress dangling pointers at ob before its slot clears
            for other in (ob as usize + 1)..=self.item_dim() {
                let _ = self.reps[other].compare_exchange(ob, rep, AcqRel, Relaxed);
            }
        }
        self.support.remove(ob);
        self.reps[ob as usize].store(0, Relaxed);
        self.item_count.fetch_sub(1, Relaxed);
    }

    pub fn validate(&self) {
        let _unique = self.mutex.write();
        let mut actual_items = 0;
        let mut actual_reps = 0;
        for ob in 1..=self.item_dim() as Ob {
            let rep = self.reps[ob as usize].load(Relaxed);
            if self.support.contains(ob) {
                assert!(rep != 0, "supported ob has no rep: {ob}");
                assert!(rep <= ob, "rep out of order: {rep}, {ob}");
                actual_items += 1;
                if rep == ob {
                    actual_reps += 1;
                }
            } else {
                assert!(rep == 0, "unsupported ob has rep: {ob}");
            }
        }
        assert_eq!(self.item_count(), actual_items);
        assert_eq!(self.rep_count(), actual_reps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullSink;

    fn carrier(item_dim: usize) -> Carrier {
        Carrier::new(item_dim, Arc::new(NullSink))
    }

    #[test]
    fn try_insert_allocates_smallest_ids() {
        let c = carrier(4);
        assert_eq!(c.try_insert(), Some(1));
        assert_eq!(c.try_insert(), Some(2));
        assert_eq!(c.item_count(), 2);
        assert_eq!(c.rep_count(), 2);
    }

    #[test]
    fn try_insert_on_full_carrier_has_no_side_effects() {
        let c = carrier(2);
        assert_eq!(c.try_insert(), Some(1));
        assert_eq!(c.try_insert(), Some(2));
        assert_eq!(c.try_insert(), None);
        assert_eq!(c.item_count(), 2);
        c.validate();
    }

    #[test]
    fn merge_demotes_and_find_compresses() {
        let c = carrier(8);
        for _ in 0..4 {
            c.try_insert();
        }
        assert_eq!(c.merge(3, 2), 2);
        assert_eq!(c.find(3), 2);
        assert_eq!(c.find(c.find(3)), c.find(3));
        assert_eq!(c.rep_count(), 3);
        assert!(c.equal(2, 3));
        assert!(!c.equal(1, 2));
    }

    #[test]
    fn merge_chains_collapse() {
        let c = carrier(8);
        for _ in 0..4 {
            c.try_insert();
        }
        c.merge(4, 3);
        c.merge(3, 2);
        c.merge(2, 1);
        for ob in 1..=4 {
            assert_eq!(c.find(ob), 1);
        }
        assert_eq!(c.rep_count(), 1);
    }

    #[test]
    fn ensure_equal_is_order_insensitive() {
        let c = carrier(8);
        for _ in 0..3 {
            c.try_insert();
        }
        assert_eq!(c.ensure_equal(1, 3), 1);
        assert_eq!(c.ensure_equal(1, 3), 1);
        assert_eq!(c.ensure_equal(3, 1), 1);
    }

    #[test]
    fn set_or_merge_installs_once() {
        let c = carrier(8);
        for _ in 0..3 {
            c.try_insert();
        }
        let slot = AtomicOb::new(0);
        assert!(c.set_or_merge(&slot, 2));
        assert!(!c.set_or_merge(&slot, 2));
        // conflicting write merges instead of losing the update
        assert!(!c.set_or_merge(&slot, 3));
        assert!(c.equal(2, 3));
    }

    #[test]
    fn remove_after_merge() {
        let c = carrier(8);
        for _ in 0..3 {
            c.try_insert();
        }
        c.merge(3, 1);
        c.unsafe_remove(3);
        assert!(!c.contains(3));
        assert_eq!(c.item_count(), 2);
        c.validate();
    }
}
