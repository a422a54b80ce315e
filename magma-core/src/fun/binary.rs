//! Binary functions: tiled forward store, `Lx`/`Rx` support rows and three
//! value-keyed inverse indices.

use core::sync::atomic::Ordering::{Acquire, Relaxed};
use std::sync::Arc;

use crate::aligned::AlignedBuf;
use crate::dense_set::{SetIter, SetView};
use crate::event::{Event, EventSink};
use crate::fun::{tile_dim, PairTable, Tile, ValKeyedTable, TILE_DIM};
use crate::rel::Rows;
use crate::{AtomicOb, Carrier, Handle, Ob};

pub struct BinaryFunction {
    carrier: Arc<Carrier>,
    rows: Rows,
    tile_dim: usize,
    tiles: AlignedBuf<Tile>,
    vlr: PairTable,
    vl_r: ValKeyedTable,
    vr_l: ValKeyedTable,
    handle: Handle,
    sink: Arc<dyn EventSink>,
}

impl BinaryFunction {
    pub fn new(carrier: Arc<Carrier>, handle: Handle, sink: Arc<dyn EventSink>) -> Self {
        let item_dim = carrier.item_dim();
        let tile_dim = tile_dim(item_dim);
        Self {
            rows: Rows::new(item_dim, false),
            tile_dim,
            tiles: AlignedBuf::zeroed(tile_dim * tile_dim),
            vlr: PairTable::new(item_dim),
            vl_r: ValKeyedTable::new(),
            vr_l: ValKeyedTable::new(),
            carrier,
            handle,
            sink,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    fn value(&self, lhs: Ob, rhs: Ob) -> &AtomicOb {
        let (i, j) = (lhs as usize, rhs as usize);
        let tile = &self.tiles[self.tile_dim * (j / TILE_DIM) + i / TILE_DIM];
        tile.slot(i, j)
    }

    pub fn defined(&self, lhs: Ob, rhs: Ob) -> bool {
        self.rows.contains(lhs, rhs)
    }

    /// Returns `f(lhs, rhs)`, or 0 when undefined.
    pub fn find(&self, lhs: Ob, rhs: Ob) -> Ob {
        self.value(lhs, rhs).load(Acquire)
    }

    /// Installs `f(lhs, rhs) = val`, or merges a conflicting value; updates
    /// the support rows and all three inverse indices and emits the event
    /// exactly when the forward slot transitions to defined.
    pub fn insert(&self, lhs: Ob, rhs: Ob, val: Ob) {
        debug_assert!(self.carrier.contains(lhs), "unsupported lhs: {lhs}");
        debug_assert!(self.carrier.contains(rhs), "unsupported rhs: {rhs}");
        debug_assert!(self.carrier.contains(val), "unsupported val: {val}");

        if self.carrier.set_or_merge(self.value(lhs, rhs), val) {
            self.rows.insert_lx(lhs, rhs);
            self.rows.insert_rx(lhs, rhs);
            self.vlr.insert(lhs, rhs, val);
            self.vl_r.insert(val, lhs, rhs);
            self.vr_l.insert(val, rhs, lhs);
            self.sink
                .notify(Event::BinaryFunction(self.handle, lhs, rhs));
        }
    }

    pub fn raw_insert(&self, lhs: Ob, rhs: Ob, val: Ob) {
        self.value(lhs, rhs).store(val, Relaxed);
        self.rows.insert_lx(lhs, rhs);
        self.rows.insert_rx(lhs, rhs);
        self.vlr.insert(lhs, rhs, val);
        self.vl_r.insert(val, lhs, rhs);
        self.vr_l.insert(val, rhs, lhs);
    }

    pub fn iter_lhs(&self, lhs: Ob) -> SetIter<'_> {
        self.rows.lx_row(lhs).iter()
    }

    pub fn iter_rhs(&self, rhs: Ob) -> SetIter<'_> {
        self.rows.rx_row(rhs).iter()
    }

    /// Snapshot of `(lhs, rhs)` pairs with `f(lhs, rhs) = val`.
    pub fn iter_val(&self, val: Ob) -> Vec<(Ob, Ob)> {
        self.vlr.pairs(val)
    }

    /// Snapshot of `rhs` with `f(lhs, rhs) = val`.
    pub fn iter_val_lhs(&self, val: Ob, lhs: Ob) -> Vec<Ob> {
        self.vl_r.others(val, lhs)
    }

    /// Snapshot of `lhs` with `f(lhs, rhs) = val`.
    pub fn iter_val_rhs(&self, val: Ob, rhs: Ob) -> Vec<Ob> {
        self.vr_l.others(val, rhs)
    }

    pub fn lx_view(&self, lhs: Ob) -> SetView<'_> {
        self.rows.lx_row(lhs)
    }

    pub fn rx_view(&self, rhs: Ob) -> SetView<'_> {
        self.rows.rx_row(rhs)
    }

    pub fn count_pairs(&self) -> usize {
        self.rows.count_pairs()
    }

    pub fn clear(&self) {
        for lhs in 1..=self.rows.item_dim() as Ob {
            for rhs in self.iter_lhs(lhs).collect::<Vec<_>>() {
                self.value(lhs, rhs).store(0, Relaxed);
            }
        }
        self.rows.clear();
        self.vlr.clear();
        self.vl_r.clear();
        self.vr_l.clear();
    }

    fn remove_entry(&self, lhs: Ob, rhs: Ob) -> Ob {
        let val = self.value(lhs, rhs).swap(0, Relaxed);
        debug_assert_ne!(val, 0, "removed undefined entry: ({lhs}, {rhs})");
        self.rows.remove(lhs, rhs);
        self.vlr.remove(lhs, rhs, val);
        self.vl_r.remove(val, lhs, rhs);
        self.vr_l.remove(val, rhs, lhs);
        val
    }

    /// Scrubs `dep` from arguments and values, inside the strict critical
    /// section. Argument entries are removed and re-inserted under the rep
    /// (merging on collision); value entries are rewritten in place.
    pub fn unsafe_merge(&self, dep: Ob) {
        let rep = self.carrier.find(dep);
        debug_assert_ne!(rep, dep, "self merge: {dep}");

        // (lhs, dep) -> (lhs, rep); the self-entry becomes (dep, rep) here
        // and moves again in the next pass
        for lhs in self.iter_rhs(dep).collect::<Vec<_>>() {
            let val = self.remove_entry(lhs, dep);
            self.insert(lhs, rep, self.carrier.find(val));
        }

        // (dep, rhs) -> (rep, rhs)
        for rhs in self.iter_lhs(dep).collect::<Vec<_>>() {
            let val = self.remove_entry(dep, rhs);
            self.insert(rep, rhs, self.carrier.find(val));
        }

        // dep as value: rewrite in place
        for (lhs, rhs) in self.vlr.pairs(dep) {
            self.value(lhs, rhs).store(rep, Relaxed);
            self.vlr.insert(lhs, rhs, rep);
            self.vl_r.remove(dep, lhs, rhs);
            self.vl_r.insert(rep, lhs, rhs);
            self.vr_l.remove(dep, rhs, lhs);
            self.vr_l.insert(rep, rhs, lhs);
        }
        self.vlr.remove_val(dep);
    }

    pub fn validate(&self) {
        self.rows.validate(self.carrier.support());
        for lhs in self.carrier.iter() {
            for rhs in self.iter_lhs(lhs) {
                let val = self.find(lhs, rhs);
                assert!(val != 0, "supported entry has null value: ({lhs}, {rhs})");
                assert!(
                    self.carrier.contains(val),
                    "entry ({lhs}, {rhs}) has unsupported value {val}"
                );
                assert!(
                    self.vlr.contains(lhs, rhs, val),
                    "Vlr missing ({lhs}, {rhs}) = {val}"
                );
                assert!(
                    self.vl_r.contains(val, lhs, rhs),
                    "VLr missing ({lhs}, {rhs}) = {val}"
                );
                assert!(
                    self.vr_l.contains(val, rhs, lhs),
                    "VRl missing ({lhs}, {rhs}) = {val}"
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

    fn setup(live: usize) -> (Arc<Carrier>, BinaryFunction) {
        let carrier = Arc::new(Carrier::new(16, Arc::new(NullSink)));
        for _ in 0..live {
            carrier.try_insert();
        }
        let fun = BinaryFunction::new(carrier.clone(), 0, Arc::new(NullSink));
        (carrier, fun)
    }

    #[test]
    fn insert_updates_all_indices() {
        let (_carrier, fun) = setup(4);
        fun.insert(1, 2, 3);
        assert_eq!(fun.find(1, 2), 3);
        assert_eq!(fun.find(2, 1), 0);
        assert_eq!(fun.iter_lhs(1).collect::<Vec<_>>(), vec![2]);
        assert_eq!(fun.iter_rhs(2).collect::<Vec<_>>(), vec![1]);
        assert_eq!(fun.iter_val(3), vec![(1, 2)]);
        assert_eq!(fun.iter_val_lhs(3, 1), vec![2]);
        assert_eq!(fun.iter_val_rhs(3, 2), vec![1]);
        fun.validate();
    }

    #[test]
    fn insert_twice_is_idempotent() {
        let (_carrier, fun) = setup(4);
        fun.insert(1, 2, 3);
        fun.insert(1, 2, 3);
        assert_eq!(fun.count_pairs(), 1);
        assert_eq!(fun.iter_val(3), vec![(1, 2)]);
        fun.validate();
    }

    #[test]
    fn conflicting_insert_merges_values() {
        let (carrier, fun) = setup(4);
        fun.insert(1, 2, 3);
        fun.insert(1, 2, 4);
        assert!(carrier.equal(3, 4));
    }

    #[test]
    fn merge_moves_arguments_and_rewrites_values() {
        let (carrier, fun) = setup(3);
        fun.insert(1, 2, 3);
        fun.insert(1, 3, 2);
        carrier.merge(3, 2);
        fun.unsafe_merge(3);

        assert_eq!(fun.find(1, 2), 2);
        assert_eq!(fun.find(1, 3), 0);
        assert_eq!(carrier.find(3), 2);
        assert!(fun.iter_val(3).is_empty());
    }

    #[test]
    fn merge_collapses_self_entry_in_two_steps() {
        let (carrier, fun) = setup(4);
        fun.insert(3, 3, 4);
        carrier.merge(3, 1);
        fun.unsafe_merge(3);
        assert_eq!(fun.find(1, 1), 4);
        assert_eq!(fun.find(3, 3), 0);
        assert_eq!(fun.find(1, 3), 0);
        assert_eq!(fun.find(3, 1), 0);
    }
}
