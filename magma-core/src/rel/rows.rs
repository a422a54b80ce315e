//! Row-pair storage shared by binary relations and function support bits.
//!
//! `(1 + item_dim)` rows of `row_stride` words each, one matrix indexed by
//! lhs (`Lx`) and one by rhs (`Rx`). Symmetric storage keeps a single
//! matrix; the `Rx` accessors alias `Lx`.

use crate::aligned::AlignedBuf;
use crate::dense_set::{row_stride, word_dim, SetView};
use crate::{AtomicWord, Ob};

pub(crate) struct Rows {
    item_dim: usize,
    stride: usize,
    lx: AlignedBuf<AtomicWord>,
    rx: Option<AlignedBuf<AtomicWord>>,
}

impl Rows {
    pub fn new(item_dim: usize, symmetric: bool) -> Self {
        let stride = row_stride(item_dim);
        let len = (1 + item_dim) * stride;
        Self {
            item_dim,
            stride,
            lx: AlignedBuf::zeroed(len),
            rx: (!symmetric).then(|| AlignedBuf::zeroed(len)),
        }
    }

    pub fn item_dim(&self) -> usize {
        self.item_dim
    }

    fn row<'a>(&self, buf: &'a AlignedBuf<AtomicWord>, i: Ob) -> SetView<'a> {
        let i = i as usize;
        debug_assert!(0 < i && i <= self.item_dim, "row out of range: {i}");
        let start = i * self.stride;
        SetView::new(self.item_dim, &buf[start..start + word_dim(self.item_dim)])
    }

    pub fn lx_row(&self, lhs: Ob) -> SetView<'_> {
        self.row(&self.lx, lhs)
    }

    pub fn rx_row(&self, rhs: Ob) -> SetView<'_> {
        self.row(self.rx.as_ref().unwrap_or(&self.lx), rhs)
    }

    pub fn contains(&self, lhs: Ob, rhs: Ob) -> bool {
        self.lx_row(lhs).contains(rhs)
    }

    /// Sets the `Lx` bit only; returns whether it was newly set. The caller
    /// mirrors into `Rx` on fresh insertion.
    pub fn insert_lx(&self, lhs: Ob, rhs: Ob) -> bool {
        self.lx_row(lhs).insert(rhs)
    }

    pub fn insert_rx(&self, lhs: Ob, rhs: Ob) {
        self.rx_row(rhs).insert(lhs);
    }

    pub fn remove(&self, lhs: Ob, rhs: Ob) {
        self.lx_row(lhs).remove(rhs);
        self.rx_row(rhs).remove(lhs);
    }

    pub fn count_pairs(&self) -> usize {
        (1..=self.item_dim as Ob)
            .map(|lhs| self.lx_row(lhs).count_items())
            .sum()
    }

    pub fn clear(&self) {
        for i in 1..=self.item_dim as Ob {
            self.lx_row(i).clear();
            if self.rx.is_some() {
                self.rx_row(i).clear();
            }
        }
    }

    /// Checks the transpose invariant `Lx[a] ∋ b  ⇔  Rx[b] ∋ a` and that
    /// every mentioned ob lies in `support`.
    pub fn validate(&self, support: SetView<'_>) {
        for lhs in 1..=self.item_dim as Ob {
            for rhs in self.lx_row(lhs).iter() {
                assert!(
                    self.rx_row(rhs).contains(lhs),
                    "Lx without Rx at ({lhs}, {rhs})"
                );
                assert!(
                    support.contains(lhs) && support.contains(rhs),
                    "unsupported pair ({lhs}, {rhs})"
                );
            }
        }
        for rhs in 1..=self.item_dim as Ob {
            for lhs in self.rx_row(rhs).iter() {
                assert!(
                    self.lx_row(lhs).contains(rhs),
                    "Rx without Lx at ({lhs}, {rhs})"
                );
            }
        }
    }
}
