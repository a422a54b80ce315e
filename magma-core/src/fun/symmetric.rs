//! Symmetric binary functions: upper-triangular tiled forward store
//! addressed by sorted `(min, max)`, one support matrix, and inverse
//! indices booked under both argument orders so value-keyed iteration
//! never has to symmetrize at query time.

use core::sync::atomic::Ordering::{Acquire, Relaxed};
use std::sync::Arc;

use crate::aligned::AlignedBuf;
use crate::dense_set::{SetIter, SetView};
use crate::event::{Event, EventSink};
use crate::fun::{tile_dim, PairTable, Tile, ValKeyedTable, TILE_DIM};
use crate::rel::Rows;
use crate::{AtomicOb, Carrier, Handle, Ob};

const fn unordered_pair_count(n: usize) -> usize {
    n * (n + 1) / 2
}

pub struct SymmetricFunction {
    carrier: Arc<Carrier>,
    rows: Rows,
    tiles: AlignedBuf<Tile>,
    vlr: PairTable,
    vl_r: ValKeyedTable,
    handle: Handle,
    sink: Arc<dyn EventSink>,
}

impl SymmetricFunction {
    pub fn new(carrier: Arc<Carrier>, handle: Handle, sink: Arc<dyn EventSink>) -> Self {
        let item_dim = carrier.item_dim();
        Self {
            rows: Rows::new(item_dim, true),
            tiles: AlignedBuf::zeroed(unordered_pair_count(tile_dim(item_dim))),
            vlr: PairTable::new(item_dim),
            vl_r: ValKeyedTable::new(),
            carrier,
            handle,
            sink,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    fn value(&self, lhs: Ob, rhs: Ob) -> &AtomicOb {
        let (i, j) = (lhs.min(rhs) as usize, lhs.max(rhs) as usize);
        let tile = &self.tiles[unordered_pair_count(j / TILE_DIM) + i / TILE_DIM];
        tile.slot(i, j)
    }

    pub fn defined(&self, lhs: Ob, rhs: Ob) -> bool {
        self.rows.contains(lhs, rhs)
    }

    /// Returns `f(lhs, rhs) = f(rhs, lhs)`, or 0 when undefined.
    pub fn find(&self, lhs: Ob, rhs: Ob) -> Ob {
        self.value(lhs, rhs).load(Acquire)
    }

    /// Installs `f(lhs, rhs) = val` at the sorted slot, or merges a
    /// conflicting value; books the inverse indices under both argument
    /// orders and emits the event exactly when the slot transitions to
    /// defined.
    pub fn insert(&self, lhs: Ob, rhs: Ob, val: Ob) {
        debug_assert!(self.carrier.contains(lhs), "unsupported lhs: {lhs}");
        debug_assert!(self.carrier.contains(rhs), "unsupported rhs: {rhs}");
        debug_assert!(self.carrier.contains(val), "unsupported val: {val}");

        if self.carrier.set_or_merge(self.value(lhs, rhs), val) {
            self.rows.insert_lx(lhs, rhs);
            self.rows.insert_rx(lhs, rhs);
            self.vlr.insert(lhs, rhs, val);
            self.vlr.insert(rhs, lhs, val);
            self.vl_r.insert(val, lhs, rhs);
            self.vl_r.insert(val, rhs, lhs);
            self.sink
                .notify(Event::SymmetricFunction(self.handle, lhs, rhs));
        }
    }

    pub fn raw_insert(&self, lhs: Ob, rhs: Ob, val: Ob) {
        self.value(lhs, rhs).store(val, Relaxed);
        self.rows.insert_lx(lhs, rhs);
        self.rows.insert_rx(lhs, rhs);
        self.vlr.insert(lhs, rhs, val);
        self.vlr.insert(rhs, lhs, val);
        self.vl_r.insert(val, lhs, rhs);
        self.vl_r.insert(val, rhs, lhs);
    }

    pub fn iter_lhs(&self, lhs: Ob) -> SetIter<'_> {
        self.rows.lx_row(lhs).iter()
    }

    /// Snapshot of `(lhs, rhs)` pairs with `f(lhs, rhs) = val`, both
    /// orders included.
    pub fn iter_val(&self, val: Ob) -> Vec<(Ob, Ob)> {
        self.vlr.pairs(val)
    }

    /// Snapshot of `rhs` with `f(lhs, rhs) = val`.
    pub fn iter_val_lhs(&self, val: Ob, lhs: Ob) -> Vec<Ob> {
        self.vl_r.others(val, lhs)
    }

    /// Snapshot of `lhs` with `f(lhs, rhs) = val`; identical to
    /// [`Self::iter_val_lhs`] by symmetry.
    pub fn iter_val_rhs(&self, val: Ob, rhs: Ob) -> Vec<Ob> {
        self.iter_val_lhs(val, rhs)
    }

    pub fn lx_view(&self, lhs: Ob) -> SetView<'_> {
        self.rows.lx_row(lhs)
    }

    /// Counts sorted entries once each.
    pub fn count_pairs(&self) -> usize {
        (1..=self.rows.item_dim() as Ob)
            .map(|lhs| self.iter_lhs(lhs).filter(|&rhs| rhs >= lhs).count())
            .sum()
    }

    pub fn clear(&self) {
        for lhs in 1..=self.rows.item_dim() as Ob {
            for rhs in self.iter_lhs(lhs).collect::<Vec<_>>() {
                if rhs >= lhs {
                    self.value(lhs, rhs).store(0, Relaxed);
                }
            }
        }
        self.rows.clear();
        self.vlr.clear();
        self.vl_r.clear();
    }

    fn remove_entry(&self, lhs: Ob, rhs: Ob) -> Ob {
        let val = self.value(lhs, rhs).swap(0, Relaxed);
        debug_assert_ne!(val, 0, "removed undefined entry: ({lhs}, {rhs})");
        self.rows.remove(lhs, rhs);
        self.vlr.remove(lhs, rhs, val);
        self.vl_r.remove(val, lhs, rhs);
        if lhs != rhs {
            self.vlr.remove(rhs, lhs, val);
            self.vl_r.remove(val, rhs, lhs);
        }
        val
    }

    /// Scrubs `dep` from arguments and values, inside the strict critical
    /// section. The self-entry `f(dep, dep)` moves to `f(rep, rep)` as a
    /// single entry, inverse indices included.
    pub fn unsafe_merge(&self, dep: Ob) {
        let rep = self.carrier.find(dep);
        debug_assert_ne!(rep, dep, "self merge: {dep}");

        // (dep, dep) -> (rep, rep)
        if self.defined(dep, dep) {
            let val = self.remove_entry(dep, dep);
            self.insert(rep, rep, self.carrier.find(val));
        }

        // (dep, rhs) -> (rep, rhs) for rhs != dep
        for rhs in self.iter_lhs(dep).collect::<Vec<_>>() {
            let val = self.remove_entry(dep, rhs);
            self.insert(rep, rhs, self.carrier.find(val));
        }

        // dep as value: rewrite in place; pairs are booked in both orders
        for (lhs, rhs) in self.vlr.pairs(dep) {
            self.value(lhs, rhs).store(rep, Relaxed);
            self.vlr.insert(lhs, rhs, rep);
            self.vl_r.remove(dep, lhs, rhs);
            self.vl_r.insert(rep, lhs, rhs);
        }
        self.vlr.remove_val(dep);
    }

    pub fn validate(&self) {
        self.rows.validate(self.carrier.support());
        for lhs in self.carrier.iter() {
            for rhs in self.iter_lhs(lhs) {
                let val = self.find(lhs, rhs);
                assert!(val != 0, "supported entry has null value: ({lhs}, {rhs})");
                assert_eq!(val, self.find(rhs, lhs), "asymmetric value at ({lhs}, {rhs})");
                assert!(
                    self.vlr.contains(lhs, rhs, val) && self.vlr.contains(rhs, lhs, val),
                    "Vlr missing ({lhs}, {rhs}) = {val}"
                );
                assert!(
                    self.vl_r.contains(val, lhs, rhs) && self.vl_r.contains(val, rhs, lhs),
                    "VLr missing ({lhs}, {rhs}) = {val}"
                );
            }
        }
        for val in self.carrier.iter() {
            for (lhs, rhs) in self.vlr.pairs(val) {
                assert_eq!(
                    self.find(lhs, rhs),
                    val,
                    "Vlr entry disagrees with forward table"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullSink;

    fn setup(live: usize) -> (Arc<Carrier>, SymmetricFunction) {
        let carrier = Arc::new(Carrier::new(16, Arc::new(NullSink)));
        for _ in 0..live {
            carrier.try_insert();
        }
        let fun = SymmetricFunction::new(carrier.clone(), 0, Arc::new(NullSink));
        (carrier, fun)
    }

    #[test]
    fn insert_is_symmetric() {
        let (_carrier, fun) = setup(8);
        fun.insert(3, 5, 7);
        assert_eq!(fun.find(3, 5), 7);
        assert_eq!(fun.find(5, 3), 7);
        assert!(fun.defined(5, 3));
        fun.validate();
    }

    #[test]
    fn sorted_storage_collapses_mirrored_inserts() {
        let (_carrier, fun) = setup(8);
        fun.insert(3, 5, 7);
        fun.insert(5, 3, 7);
        assert_eq!(fun.count_pairs(), 1);
        let mut pairs = fun.iter_val(7);
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(3, 5), (5, 3)]);
        fun.validate();
    }

    #[test]
    fn self_entry_stores_one_slot() {
        let (_carrier, fun) = setup(8);
        fun.insert(4, 4, 2);
        assert_eq!(fun.find(4, 4), 2);
        assert_eq!(fun.iter_val(2), vec![(4, 4)]);
        assert_eq!(fun.iter_val_lhs(2, 4), vec![4]);
        fun.validate();
    }

    #[test]
    fn merge_moves_self_entry_with_inverse_updates() {
        let (carrier, fun) = setup(8);
        fun.insert(5, 5, 6);
        carrier.merge(5, 2);
        fun.unsafe_merge(5);
        assert_eq!(fun.find(2, 2), 6);
        assert_eq!(fun.find(5, 5), 0);
        assert_eq!(fun.iter_val(6), vec![(2, 2)]);
        assert_eq!(fun.iter_val_lhs(6, 2), vec![2]);
        assert!(fun.iter_val_lhs(6, 5).is_empty());
        fun.validate();
    }

    #[test]
    fn merge_rewrites_values_in_place() {
        let (carrier, fun) = setup(8);
        fun.insert(1, 2, 5);
        carrier.merge(5, 3);
        fun.unsafe_merge(5);
        assert_eq!(fun.find(1, 2), 3);
        let mut pairs = fun.iter_val(3);
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(1, 2), (2, 1)]);
        assert!(fun.iter_val(5).is_empty());
        fun.validate();
    }
}
