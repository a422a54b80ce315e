//! Dense sets of obs as packed atomic bit vectors.
//!
//! Position 0 is reserved (ob 0 means "none") and is always clear. Capacity
//! is padded to a 512-bit cache-line boundary so whole-set operations can
//! run word-at-a-time over aligned storage.
//!
//! Writes are atomic per word; iteration tolerates concurrent bit-sets (the
//! common case during inference). A concurrent clear may cause an iterator
//! to skip or repeat an ob, which rule execution tolerates because rules
//! are idempotent and re-fire until saturation.

use core::sync::atomic::Ordering::{AcqRel, Relaxed};

use crate::aligned::AlignedBuf;
use crate::{AtomicWord, Ob, Word, WORD_BITS};

const BITS_PER_CACHE_LINE: usize = 512;
const WORDS_PER_CACHE_LINE: usize = BITS_PER_CACHE_LINE / WORD_BITS;

/// Number of words needed to cover bits `0..=item_dim`.
pub(crate) const fn word_dim(item_dim: usize) -> usize {
    (item_dim + WORD_BITS) / WORD_BITS
}

/// Row stride in words: `word_dim` rounded up to a cache line.
pub(crate) const fn row_stride(item_dim: usize) -> usize {
    (word_dim(item_dim) + WORDS_PER_CACHE_LINE - 1) / WORDS_PER_CACHE_LINE
        * WORDS_PER_CACHE_LINE
}

/// Bits of word `m` that correspond to obs `1..=item_dim`.
fn valid_mask(item_dim: usize, m: usize) -> Word {
    let mut mask = !0;
    if m == 0 {
        mask &= !1;
    }
    if m == word_dim(item_dim) - 1 {
        let end = (item_dim + 1) % WORD_BITS;
        if end != 0 {
            mask &= !0 >> (WORD_BITS - end);
        }
    }
    mask
}

/// A borrowed view over externally owned set words.
///
/// Relation rows and function support rows hand these to the virtual
/// machine; mutation through a view is an atomic update of the underlying
/// words.
#[derive(Copy, Clone)]
pub struct SetView<'a> {
    item_dim: usize,
    words: &'a [AtomicWord],
}

impl<'a> SetView<'a> {
    pub(crate) fn new(item_dim: usize, words: &'a [AtomicWord]) -> Self {
        debug_assert_eq!(words.len(), word_dim(item_dim));
        Self { item_dim, words }
    }

    pub fn item_dim(&self) -> usize {
        self.item_dim
    }

    pub(crate) fn words(&self) -> &'a [AtomicWord] {
        self.words
    }

    pub fn contains(&self, ob: Ob) -> bool {
        let i = ob as usize;
        debug_assert!(0 < i && i <= self.item_dim, "ob out of range: {ob}");
        self.words[i / WORD_BITS].load(Relaxed) & (1 << (i % WORD_BITS)) != 0
    }

    /// Sets the bit for `ob`; returns whether it was newly set.
    pub fn insert(&self, ob: Ob) -> bool {
        let i = ob as usize;
        debug_assert!(0 < i && i <= self.item_dim, "ob out of range: {ob}");
        let bit = 1 << (i % WORD_BITS);
        self.words[i / WORD_BITS].fetch_or(bit, AcqRel) & bit == 0
    }

    /// Clears the bit for `ob`; returns whether it was previously set.
    pub fn remove(&self, ob: Ob) -> bool {
        let i = ob as usize;
        debug_assert!(0 < i && i <= self.item_dim, "ob out of range: {ob}");
        let bit = 1 << (i % WORD_BITS);
        self.words[i / WORD_BITS].fetch_and(!bit, AcqRel) & bit != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Relaxed) == 0)
    }

    pub fn count_items(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Relaxed).count_ones() as usize)
            .sum()
    }

    pub fn disjoint(&self, other: SetView<'_>) -> bool {
        debug_assert_eq!(self.item_dim, other.item_dim);
        self.words
            .iter()
            .zip(other.words)
            .all(|(s, t)| s.load(Relaxed) & t.load(Relaxed) == 0)
    }

    pub fn is_subset_of(&self, other: SetView<'_>) -> bool {
        debug_assert_eq!(self.item_dim, other.item_dim);
        self.words
            .iter()
            .zip(other.words)
            .all(|(s, t)| s.load(Relaxed) & !t.load(Relaxed) == 0)
    }

    pub fn set_eq(&self, other: SetView<'_>) -> bool {
        debug_assert_eq!(self.item_dim, other.item_dim);
        self.words
            .iter()
            .zip(other.words)
            .all(|(s, t)| s.load(Relaxed) == t.load(Relaxed))
    }

    pub fn clear(&self) {
        for w in self.words {
            w.store(0, Relaxed);
        }
    }

    /// `self |= other`.
    pub fn union_with(&self, other: SetView<'_>) {
        debug_assert_eq!(self.item_dim, other.item_dim);
        for (s, t) in self.words.iter().zip(other.words) {
            s.fetch_or(t.load(Relaxed), AcqRel);
        }
    }

    /// `self &= other`.
    pub fn intersect_with(&self, other: SetView<'_>) {
        debug_assert_eq!(self.item_dim, other.item_dim);
        for (s, t) in self.words.iter().zip(other.words) {
            s.fetch_and(t.load(Relaxed), AcqRel);
        }
    }

    /// `self = lhs | rhs`.
    pub fn assign_union(&self, lhs: SetView<'_>, rhs: SetView<'_>) {
        debug_assert_eq!(self.item_dim, lhs.item_dim);
        debug_assert_eq!(self.item_dim, rhs.item_dim);
        for ((u, s), t) in self.words.iter().zip(lhs.words).zip(rhs.words) {
            u.store(s.load(Relaxed) | t.load(Relaxed), Relaxed);
        }
    }

    /// `self = lhs & rhs`.
    pub fn assign_intersection(&self, lhs: SetView<'_>, rhs: SetView<'_>) {
        debug_assert_eq!(self.item_dim, lhs.item_dim);
        debug_assert_eq!(self.item_dim, rhs.item_dim);
        for ((u, s), t) in self.words.iter().zip(lhs.words).zip(rhs.words) {
            u.store(s.load(Relaxed) & t.load(Relaxed), Relaxed);
        }
    }

    /// `self |= dep; dep = 0`.
    pub fn merge_from(&self, dep: SetView<'_>) {
        debug_assert_eq!(self.item_dim, dep.item_dim);
        for (r, d) in self.words.iter().zip(dep.words) {
            let moved = d.swap(0, AcqRel);
            r.fetch_or(moved, AcqRel);
        }
    }

    /// `diff = dep - self; self |= dep; dep = 0`; returns whether `self` grew.
    pub fn merge_from_diff(&self, dep: SetView<'_>, diff: SetView<'_>) -> bool {
        debug_assert_eq!(self.item_dim, dep.item_dim);
        debug_assert_eq!(self.item_dim, diff.item_dim);
        let mut changed = 0;
        for ((r, d), c) in self.words.iter().zip(dep.words).zip(diff.words) {
            let moved = d.swap(0, AcqRel);
            let prior = r.fetch_or(moved, AcqRel);
            let grew = moved & !prior;
            c.store(grew, Relaxed);
            changed |= grew;
        }
        changed != 0
    }

    /// `diff = src - self; self |= src`; returns whether `self` grew.
    pub fn ensure_from(&self, src: SetView<'_>, diff: SetView<'_>) -> bool {
        debug_assert_eq!(self.item_dim, src.item_dim);
        debug_assert_eq!(self.item_dim, diff.item_dim);
        let mut changed = 0;
        for ((r, s), c) in self.words.iter().zip(src.words).zip(diff.words) {
            let incoming = s.load(Relaxed);
            let prior = r.fetch_or(incoming, AcqRel);
            let grew = incoming & !prior;
            c.store(grew, Relaxed);
            changed |= grew;
        }
        changed != 0
    }

    pub fn iter(&self) -> SetIter<'a> {
        IntersectionIter::new(self.item_dim, [*self], [])
    }
}

/// A fixed-capacity owned set of obs.
pub struct DenseSet {
    item_dim: usize,
    words: AlignedBuf<AtomicWord>,
}

impl DenseSet {
    pub fn new(item_dim: usize) -> Self {
        assert!(item_dim > 0, "empty carrier dimension");
        assert!(item_dim < Ob::MAX as usize, "carrier dimension overflow");
        Self {
            item_dim,
            words: AlignedBuf::zeroed(row_stride(item_dim)),
        }
    }

    pub fn item_dim(&self) -> usize {
        self.item_dim
    }

    pub fn view(&self) -> SetView<'_> {
        SetView::new(self.item_dim, &self.words[..word_dim(self.item_dim)])
    }

    pub fn contains(&self, ob: Ob) -> bool {
        self.view().contains(ob)
    }

    pub fn insert(&self, ob: Ob) -> bool {
        self.view().insert(ob)
    }

    pub fn remove(&self, ob: Ob) -> bool {
        self.view().remove(ob)
    }

    pub fn is_empty(&self) -> bool {
        self.view().is_empty()
    }

    pub fn count_items(&self) -> usize {
        self.view().count_items()
    }

    pub fn clear(&self) {
        self.view().clear();
    }

    /// Inserts every ob in `1..=item_dim`.
    pub fn fill_all(&self) {
        for m in 0..word_dim(self.item_dim) {
            self.words[m].store(valid_mask(self.item_dim, m), Relaxed);
        }
    }

    /// Claims the smallest unset bit, or `None` when the set is full.
    ///
    /// Safe under concurrent insertion: a lost race on one bit retries on
    /// the updated word.
    pub fn try_insert_one(&self) -> Option<Ob> {
        for m in 0..word_dim(self.item_dim) {
            let valid = valid_mask(self.item_dim, m);
            let mut word = self.words[m].load(Relaxed);
            loop {
                let free = !word & valid;
                if free == 0 {
                    break;
                }
                let bit = free & free.wrapping_neg();
                let prior = self.words[m].fetch_or(bit, AcqRel);
                if prior & bit == 0 {
                    let ob = m * WORD_BITS + bit.trailing_zeros() as usize;
                    return Some(ob as Ob);
                }
                word = prior;
            }
        }
        None
    }

    pub fn iter(&self) -> SetIter<'_> {
        self.view().iter()
    }
}

/// Ascending iteration over the intersection of `P` positive and `N`
/// negated sets.
///
/// When the source combination has no positive operand, the carrier support
/// is supplied as the first positive set.
pub struct IntersectionIter<'a, const P: usize, const N: usize> {
    pos: [SetView<'a>; P],
    neg: [SetView<'a>; N],
    word_dim: usize,
    index: usize,
    word: Word,
}

/// Iterator over a single set.
pub type SetIter<'a> = IntersectionIter<'a, 1, 0>;

impl<'a, const P: usize, const N: usize> IntersectionIter<'a, P, N> {
    pub fn new(item_dim: usize, pos: [SetView<'a>; P], neg: [SetView<'a>; N]) -> Self {
        debug_assert!(P > 0, "intersection needs a positive operand");
        let mut iter = Self {
            pos,
            neg,
            word_dim: word_dim(item_dim),
            index: 0,
            word: 0,
        };
        iter.word = iter.combine(0);
        iter
    }

    fn combine(&self, m: usize) -> Word {
        let mut word = !0;
        for s in &self.pos {
            word &= s.words()[m].load(Relaxed);
        }
        for s in &self.neg {
            word &= !s.words()[m].load(Relaxed);
        }
        if m == 0 {
            word &= !1;
        }
        word
    }
}

impl<const P: usize, const N: usize> Iterator for IntersectionIter<'_, P, N> {
    type Item = Ob;

    fn next(&mut self) -> Option<Ob> {
        loop {
            if self.word != 0 {
                let bit = self.word.trailing_zeros() as usize;
                self.word &= self.word - 1;
                return Some((self.index * WORD_BITS + bit) as Ob);
            }
            self.index += 1;
            if self.index >= self.word_dim {
                return None;
            }
            self.word = self.combine(self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    const DIM: usize = 200;

    #[test]
    fn insert_remove_contains() {
        let set = DenseSet::new(DIM);
        assert!(!set.contains(1));
        assert!(set.insert(1));
        assert!(!set.insert(1));
        assert!(set.contains(1));
        assert!(set.remove(1));
        assert!(!set.remove(1));
        assert!(!set.contains(1));
    }

    #[test]
    fn iteration_is_ascending() {
        let set = DenseSet::new(DIM);
        for ob in [7, 3, 199, 64, 65, 128] {
            set.insert(ob);
        }
        let obs: Vec<Ob> = set.iter().collect();
        assert_eq!(obs, vec![3, 7, 64, 65, 128, 199]);
    }

    #[test]
    fn empty_iteration_terminates_immediately() {
        let set = DenseSet::new(DIM);
        assert_eq!(set.iter().next(), None);
    }

    #[test]
    fn try_insert_one_picks_smallest_unused() {
        let set = DenseSet::new(5);
        for expected in 1..=5 {
            assert_eq!(set.try_insert_one(), Some(expected));
        }
        assert_eq!(set.try_insert_one(), None);
        set.remove(3);
        assert_eq!(set.try_insert_one(), Some(3));
    }

    #[test]
    fn fill_all_excludes_zero() {
        let set = DenseSet::new(DIM);
        set.fill_all();
        assert_eq!(set.count_items(), DIM);
        assert_eq!(set.iter().next(), Some(1));
        assert_eq!(set.iter().last(), Some(DIM as Ob));
    }

    #[test]
    fn merge_from_diff_reports_growth() {
        let rep = DenseSet::new(DIM);
        let dep = DenseSet::new(DIM);
        let diff = DenseSet::new(DIM);
        rep.insert(1);
        dep.insert(1);
        dep.insert(2);
        assert!(rep.view().merge_from_diff(dep.view(), diff.view()));
        assert!(rep.contains(1) && rep.contains(2));
        assert!(dep.is_empty());
        assert_eq!(diff.iter().collect::<Vec<_>>(), vec![2]);

        let dep2 = DenseSet::new(DIM);
        dep2.insert(1);
        assert!(!rep.view().merge_from_diff(dep2.view(), diff.view()));
    }

    #[test]
    fn three_operand_assignments() {
        let a = DenseSet::new(DIM);
        let b = DenseSet::new(DIM);
        let out = DenseSet::new(DIM);
        for ob in [1, 2, 3] {
            a.insert(ob);
        }
        for ob in [2, 3, 4] {
            b.insert(ob);
        }
        out.view().assign_union(a.view(), b.view());
        assert_eq!(out.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        out.view().assign_intersection(a.view(), b.view());
        assert_eq!(out.iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn intersection_with_negation() {
        let a = DenseSet::new(DIM);
        let b = DenseSet::new(DIM);
        for ob in 1..=20 {
            a.insert(ob);
        }
        for ob in (2..=20).step_by(2) {
            b.insert(ob);
        }
        let odds: Vec<Ob> =
            IntersectionIter::new(DIM, [a.view()], [b.view()]).collect();
        assert_eq!(odds, (1..=19).step_by(2).collect::<Vec<Ob>>());
    }

    fn model_insert(obs: &[Ob]) -> BTreeSet<Ob> {
        obs.iter().copied().collect()
    }

    proptest! {
        #[test]
        fn union_matches_model(
            xs in proptest::collection::vec(1..=DIM as Ob, 0..64),
            ys in proptest::collection::vec(1..=DIM as Ob, 0..64),
        ) {
            let a = DenseSet::new(DIM);
            let b = DenseSet::new(DIM);
            for &x in &xs { a.insert(x); }
            for &y in &ys { b.insert(y); }
            a.view().union_with(b.view());

            let mut model = model_insert(&xs);
            model.extend(model_insert(&ys));
            prop_assert_eq!(a.iter().collect::<Vec<_>>(),
                            model.into_iter().collect::<Vec<_>>());
        }

        #[test]
        fn subset_and_disjoint_match_model(
            xs in proptest::collection::vec(1..=DIM as Ob, 0..32),
            ys in proptest::collection::vec(1..=DIM as Ob, 0..32),
        ) {
            let a = DenseSet::new(DIM);
            let b = DenseSet::new(DIM);
            for &x in &xs { a.insert(x); }
            for &y in &ys { b.insert(y); }
            let ma = model_insert(&xs);
            let mb = model_insert(&ys);
            prop_assert_eq!(a.view().is_subset_of(b.view()), ma.is_subset(&mb));
            prop_assert_eq!(a.view().disjoint(b.view()), ma.is_disjoint(&mb));
        }
    }
}
