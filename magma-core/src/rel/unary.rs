//! Unary relations: one dense row over the carrier.

use std::sync::Arc;

use crate::dense_set::{DenseSet, SetIter, SetView};
use crate::event::{Event, EventSink};
use crate::{Carrier, Handle, Ob};

pub struct UnaryRelation {
    carrier: Arc<Carrier>,
    set: DenseSet,
    handle: Handle,
    sink: Arc<dyn EventSink>,
}

impl UnaryRelation {
    pub fn new(carrier: Arc<Carrier>, handle: Handle, sink: Arc<dyn EventSink>) -> Self {
        let set = DenseSet::new(carrier.item_dim());
        Self {
            carrier,
            set,
            handle,
            sink,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn contains(&self, ob: Ob) -> bool {
        self.set.contains(ob)
    }

    /// Idempotent insert; emits the event only when the bit was newly set.
    pub fn insert(&self, ob: Ob) {
        debug_assert!(self.carrier.contains(ob), "unsupported ob: {ob}");
        if self.set.insert(ob) {
            self.sink.notify(Event::UnaryRelation(self.handle, ob));
        }
    }

    pub fn raw_insert(&self, ob: Ob) {
        self.set.insert(ob);
    }

    pub fn iter(&self) -> SetIter<'_> {
        self.set.iter()
    }

    pub fn view(&self) -> SetView<'_> {
        self.set.view()
    }

    pub fn count_items(&self) -> usize {
        self.set.count_items()
    }

    pub fn clear(&self) {
        self.set.clear();
    }

    /// Rewrites a membership of `dep` as a membership of its rep.
    pub fn unsafe_merge(&self, dep: Ob) {
        if self.set.remove(dep) {
            self.insert(self.carrier.find(dep));
        }
    }

    /// Returns a witness ob contained in both relations, if any.
    pub fn intersection_witness(&self, other: &UnaryRelation) -> Option<Ob> {
        if self.set.view().disjoint(other.set.view()) {
            None
        } else {
            crate::dense_set::IntersectionIter::new(
                self.set.item_dim(),
                [self.set.view(), other.set.view()],
                [],
            )
            .next()
        }
    }

    pub fn validate(&self) {
        assert!(
            self.set.view().is_subset_of(self.carrier.support()),
            "unary relation mentions unsupported obs"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NullSink;

    #[test]
    fn merge_rewrites_membership() {
        let carrier = Arc::new(Carrier::new(8, Arc::new(NullSink)));
        for _ in 0..3 {
            carrier.try_insert();
        }
        let rel = UnaryRelation::new(carrier.clone(), 0, Arc::new(NullSink));
        rel.insert(3);
        carrier.merge(3, 1);
        rel.unsafe_merge(3);
        assert!(!rel.contains(3));
        assert!(rel.contains(1));
    }
}
