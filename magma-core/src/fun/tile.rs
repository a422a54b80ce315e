//! Tiled ob storage for binary and symmetric function tables.
//!
//! An address `(i, j)` selects tile `(i >> 3, j >> 3)` and slot
//! `(i & 7, j & 7)` within it, giving spatial locality to rule loops that
//! fix one argument.

use crate::aligned::Zeroed;
use crate::AtomicOb;

pub(crate) const TILE_DIM: usize = 8;
const TILE_POS_MASK: usize = TILE_DIM - 1;

#[repr(C, align(64))]
pub(crate) struct Tile([AtomicOb; TILE_DIM * TILE_DIM]);

unsafe impl Zeroed for Tile {}

impl Tile {
    pub fn slot(&self, i: usize, j: usize) -> &AtomicOb {
        &self.0[((j & TILE_POS_MASK) << 3) | (i & TILE_POS_MASK)]
    }
}

/// Number of tiles per side for a given carrier dimension.
pub(crate) const fn tile_dim(item_dim: usize) -> usize {
    (item_dim + TILE_DIM) / TILE_DIM
}
