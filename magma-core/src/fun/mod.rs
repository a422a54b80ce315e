mod binary;
mod injective;
mod inverse;
mod nullary;
mod symmetric;
mod tile;

pub(crate) use inverse::{PairTable, ValKeyedTable};
pub(crate) use tile::{tile_dim, Tile, TILE_DIM};

pub use binary::BinaryFunction;
pub use injective::InjectiveFunction;
pub use nullary::NullaryFunction;
pub use symmetric::SymmetricFunction;
