//! Engine error variants.

use magma_core::Ob;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Carrier capacity exhausted where an insertion was required.
    #[error("carrier is full")]
    Full,
    /// Out-of-range ob reference; always a programmer error.
    #[error("ob out of range: {ob}")]
    InvalidId { ob: Ob },
    /// A merge would equate obs already separated by a negative order
    /// relation, or the positive and negative orders intersect. Fatal for
    /// the session.
    #[error("inconsistent structure: {lhs} = {rhs} contradicts a negative fact")]
    Inconsistent { lhs: Ob, rhs: Ob },
    /// A core fact expression failed to parse against the signature.
    #[error("line {lineno}: bad fact: {reason}")]
    BadFact { lineno: usize, reason: String },
    /// A language weight entry failed to parse against the signature.
    #[error("line {lineno}: bad language entry: {reason}")]
    BadLanguage { lineno: usize, reason: String },
    #[error(transparent)]
    Parse(#[from] magma_asm::ParseError),
    #[error(transparent)]
    Signature(#[from] magma_core::SignatureError),
    /// Snapshot validation hash mismatch on load.
    #[error("corrupt snapshot: {table}")]
    CorruptSnapshot { table: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the session must terminate without recovery.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Full)
    }
}

pub type Result<T> = core::result::Result<T, EngineError>;
