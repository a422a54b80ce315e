//! Value-keyed inverse indices for binary and symmetric functions.
//!
//! `PairTable` maps `val -> {(lhs, rhs)}`; `ValKeyedTable` maps
//! `(val, lhs) -> {rhs}` (and, keyed the other way, `(val, rhs) -> {lhs}`).
//! Both allow concurrent insertion from rule workers; removal happens only
//! inside the strict critical section.
//!
//! Iteration hands out snapshots rather than live guards so that rule
//! bodies may insert into the same index while walking it.

use dashmap::{DashMap, DashSet};

use crate::Ob;

pub(crate) struct PairTable {
    data: Box<[DashSet<(Ob, Ob)>]>,
}

impl PairTable {
    pub fn new(item_dim: usize) -> Self {
        let data = (0..=item_dim).map(|_| DashSet::new()).collect();
        Self { data }
    }

    pub fn contains(&self, lhs: Ob, rhs: Ob, val: Ob) -> bool {
        self.data[val as usize].contains(&(lhs, rhs))
    }

    pub fn insert(&self, lhs: Ob, rhs: Ob, val: Ob) {
        self.data[val as usize].insert((lhs, rhs));
    }

    pub fn remove(&self, lhs: Ob, rhs: Ob, val: Ob) {
        self.data[val as usize].remove(&(lhs, rhs));
    }

    pub fn remove_val(&self, val: Ob) {
        self.data[val as usize].clear();
    }

    /// Snapshot of all pairs mapping to `val`.
    pub fn pairs(&self, val: Ob) -> Vec<(Ob, Ob)> {
        self.data[val as usize].iter().map(|p| *p).collect()
    }

    pub fn clear(&self) {
        for set in self.data.iter() {
            set.clear();
        }
    }
}

pub(crate) struct ValKeyedTable {
    data: DashMap<(Ob, Ob), DashSet<Ob>>,
}

impl ValKeyedTable {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    pub fn contains(&self, val: Ob, key: Ob, other: Ob) -> bool {
        self.data
            .get(&(val, key))
            .is_some_and(|set| set.contains(&other))
    }

    pub fn insert(&self, val: Ob, key: Ob, other: Ob) {
        self.data.entry((val, key)).or_default().insert(other);
    }

    pub fn remove(&self, val: Ob, key: Ob, other: Ob) {
        if let Some(set) = self.data.get(&(val, key)) {
            set.remove(&other);
        }
    }

    /// Snapshot of all obs stored under `(val, key)`.
    pub fn others(&self, val: Ob, key: Ob) -> Vec<Ob> {
        self.data
            .get(&(val, key))
            .map(|set| set.iter().map(|ob| *ob).collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}
