//! In-memory algebraic structure: a carrier of obs with union-find, dense
//! bit-packed relations, tiled function tables and the signature that owns
//! them.
//!
//! All tables support concurrent relaxed reads and monotone atomic writes;
//! equivalence merges run in a strict critical section driven by the engine.

mod aligned;
mod carrier;
mod dense_set;
mod event;
mod fun;
mod rel;
mod signature;

pub use carrier::Carrier;
pub use dense_set::{DenseSet, IntersectionIter, SetIter, SetView};
pub use event::{Event, EventSink, NullSink};
pub use fun::{BinaryFunction, InjectiveFunction, NullaryFunction, SymmetricFunction};
pub use rel::{BinaryRelation, UnaryRelation};
pub use signature::{Arity, Signature, SignatureError};

/// An element of the carrier. Ob `0` denotes "none".
pub type Ob = u32;

/// Atomic slot holding an [`Ob`]; every racily written slot uses this type.
pub type AtomicOb = core::sync::atomic::AtomicU32;

/// Backing word of the dense bit sets.
pub type Word = u64;

/// Atomic backing word; relation rows and set storage are arrays of these.
pub type AtomicWord = core::sync::atomic::AtomicU64;

/// Bits per backing word.
pub const WORD_BITS: usize = Word::BITS as usize;

/// Table handle: the dense index the byte-code uses to name a relation or
/// function. Assigned by the [`Signature`] in declaration order.
pub type Handle = u8;
