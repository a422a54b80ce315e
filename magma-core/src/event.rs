//! Structure events.
//!
//! Tables announce every newly observed fact through an [`EventSink`]; the
//! engine's scheduler is the production sink and turns each event into a
//! task. Events carry dense table handles, never table references.

use crate::{Handle, Ob};

/// A newly observed fact or carrier change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A fresh ob entered the carrier.
    Exists(Ob),
    /// `dep` was demoted; its tables must be scrubbed.
    Merge(Ob),
    /// `ob` entered the unary relation with this handle.
    UnaryRelation(Handle, Ob),
    /// `(lhs, rhs)` entered the binary relation with this handle.
    BinaryRelation(Handle, Ob, Ob),
    /// The nullary function with this handle became defined.
    NullaryFunction(Handle),
    /// `key` became defined in the injective function with this handle.
    InjectiveFunction(Handle, Ob),
    /// `(lhs, rhs)` became defined in the binary function with this handle.
    BinaryFunction(Handle, Ob, Ob),
    /// `(lhs, rhs)` became defined in the symmetric function with this
    /// handle.
    SymmetricFunction(Handle, Ob, Ob),
}

/// Receiver of structure events.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: Event);
}

/// Sink that discards every event; used while loading snapshots and in
/// table-level tests.
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _event: Event) {}
}
