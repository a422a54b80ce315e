mod binary;
mod rows;
mod unary;

pub(crate) use rows::Rows;

pub use binary::BinaryRelation;
pub use unary::UnaryRelation;
