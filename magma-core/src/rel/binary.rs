//! Binary relations: paired `Lx`/`Rx` bit matrices over the carrier.

use std::sync::Arc;

use crate::dense_set::{DenseSet, SetIter, SetView};
use crate::event::{Event, EventSink};
use crate::rel::Rows;
use crate::{Carrier, Handle, Ob};

pub struct BinaryRelation {
    carrier: Arc<Carrier>,
    rows: Rows,
    handle: Handle,
    sink: Arc<dyn EventSink>,
}

impl BinaryRelation {
    pub fn new(carrier: Arc<Carrier>, handle: Handle, sink: Arc<dyn EventSink>) -> Self {
        let rows = Rows::new(carrier.item_dim(), false);
        Self {
            carrier,
            rows,
            handle,
            sink,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn contains(&self, lhs: Ob, rhs: Ob) -> bool {
        self.rows.contains(lhs, rhs)
    }

    /// Idempotent atomic insert: sets the `Lx` bit and, exactly when that
    /// bit was newly set, mirrors into `Rx` and emits the event.
    pub fn insert(&self, lhs: Ob, rhs: Ob) {
        debug_assert!(self.carrier.contains(lhs), "unsupported lhs: {lhs}");
        debug_assert!(self.carrier.contains(rhs), "unsupported rhs: {rhs}");
        if self.rows.insert_lx(lhs, rhs) {
            self.rows.insert_rx(lhs, rhs);
            self.sink.notify(Event::BinaryRelation(self.handle, lhs, rhs));
        }
    }

    pub fn raw_insert(&self, lhs: Ob, rhs: Ob) {
        self.rows.insert_lx(lhs, rhs);
        self.rows.insert_rx(lhs, rhs);
    }

    pub fn lx_view(&self, lhs: Ob) -> SetView<'_> {
        self.rows.lx_row(lhs)
    }

    pub fn rx_view(&self, rhs: Ob) -> SetView<'_> {
        self.rows.rx_row(rhs)
    }

    pub fn iter_lhs(&self, lhs: Ob) -> SetIter<'_> {
        self.rows.lx_row(lhs).iter()
    }

    pub fn iter_rhs(&self, rhs: Ob) -> SetIter<'_> {
        self.rows.rx_row(rhs).iter()
    }

    pub fn count_pairs(&self) -> usize {
        self.rows.count_pairs()
    }

    pub fn clear(&self) {
        self.rows.clear();
    }

    /// Collapses every pair referencing `dep` into a pair referencing its
    /// rep, keeping both matrices in agreement and emitting an insert event
    /// for each newly observed pair. Runs inside the strict critical
    /// section.
    pub fn unsafe_merge(&self, dep: Ob) {
        let rep = self.carrier.find(dep);
        debug_assert_ne!(rep, dep, "self merge: {dep}");
        let item_dim = self.rows.item_dim();
        let diff = DenseSet::new(item_dim);

        // (dep, rhs) -> (rep, rhs)
        let moved: Vec<Ob> = self.rows.lx_row(dep).iter().collect();
        self.rows
            .lx_row(rep)
            .merge_from_diff(self.rows.lx_row(dep), diff.view());
        for &rhs in &moved {
            self.rows.rx_row(rhs).remove(dep);
        }
        for rhs in diff.iter() {
            self.rows.rx_row(rhs).insert(rep);
            self.sink.notify(Event::BinaryRelation(self.handle, rep, rhs));
        }

        // (lhs, dep) -> (lhs, rep)
        let moved: Vec<Ob> = self.rows.rx_row(dep).iter().collect();
        self.rows
            .rx_row(rep)
            .merge_from_diff(self.rows.rx_row(dep), diff.view());
        for &lhs in &moved {
            self.rows.lx_row(lhs).remove(dep);
        }
        for lhs in diff.iter() {
            self.rows.lx_row(lhs).insert(rep);
            self.sink.notify(Event::BinaryRelation(self.handle, lhs, rep));
        }
    }

    /// Returns a witness pair contained in both relations, if any.
    pub fn intersection_witness(&self, other: &BinaryRelation) -> Option<(Ob, Ob)> {
        for lhs in self.carrier.iter() {
            if let Some(rhs) = crate::dense_set::IntersectionIter::new(
                self.rows.item_dim(),
                [self.rows.lx_row(lhs), other.rows.lx_row(lhs)],
                [],
            )
            .next()
            {
                return Some((lhs, rhs));
            }
        }
        None
    }

    pub fn validate(&self) {
        self.rows.validate(self.carrier.support());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullSink;

    fn setup(live: usize) -> (Arc<Carrier>, BinaryRelation) {
        let carrier = Arc::new(Carrier::new(16, Arc::new(NullSink)));
        for _ in 0..live {
            carrier.try_insert();
        }
        let rel = BinaryRelation::new(carrier.clone(), 0, Arc::new(NullSink));
        (carrier, rel)
    }

    #[test]
    fn insert_is_mirrored_and_idempotent() {
        let (_carrier, rel) = setup(4);
        rel.insert(1, 3);
        rel.insert(1, 3);
        assert!(rel.contains(1, 3));
        assert_eq!(rel.iter_lhs(1).collect::<Vec<_>>(), vec![3]);
        assert_eq!(rel.iter_rhs(3).collect::<Vec<_>>(), vec![1]);
        assert_eq!(rel.count_pairs(), 1);
    }

    #[test]
    fn merge_collapses_rows_and_columns() {
        let (carrier, rel) = setup(4);
        rel.insert(3, 1);
        rel.insert(2, 3);
        rel.insert(3, 3);
        carrier.merge(3, 2);
        rel.unsafe_merge(3);
        assert!(rel.contains(2, 1));
        assert!(rel.contains(2, 2));
        for other in 1..=4 {
            assert!(!rel.contains(3, other));
            assert!(!rel.contains(other, 3));
        }
        rel.validate();
    }

    #[test]
    fn disjointness_witness() {
        let (_carrier, pos) = setup(4);
        let carrier2 = Arc::new(Carrier::new(16, Arc::new(NullSink)));
        for _ in 0..4 {
            carrier2.try_insert();
        }
        let neg = BinaryRelation::new(carrier2, 1, Arc::new(NullSink));
        pos.insert(1, 2);
        neg.raw_insert(2, 1);
        assert_eq!(pos.intersection_witness(&neg), None);
        neg.raw_insert(1, 2);
        assert_eq!(pos.intersection_witness(&neg), Some((1, 2)));
    }
}
