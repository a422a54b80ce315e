//! The op-code table.
//!
//! Textual op-code names in rule listings are the SCREAMING_SNAKE_CASE
//! serialization of the variants. Each op is one byte followed by the fixed
//! operand bytes listed in [`OpCode::arg_kinds`].

use magma_core::Arity;

/// Operand kinds of the byte-code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Small-float-encoded literal.
    Uint8,
    /// Declares an ob register.
    NewOb,
    /// Loads a declared ob register.
    Ob,
    /// Declares a set register.
    NewSet,
    /// Loads a declared set register.
    Set,
    UnaryRelation,
    BinaryRelation,
    NullaryFunction,
    InjectiveFunction,
    BinaryFunction,
    SymmetricFunction,
}

impl ArgKind {
    /// The signature namespace this operand resolves against, if any.
    pub fn arity(self) -> Option<Arity> {
        match self {
            ArgKind::UnaryRelation => Some(Arity::UnaryRelation),
            ArgKind::BinaryRelation => Some(Arity::BinaryRelation),
            ArgKind::NullaryFunction => Some(Arity::NullaryFunction),
            ArgKind::InjectiveFunction => Some(Arity::InjectiveFunction),
            ArgKind::BinaryFunction => Some(Arity::BinaryFunction),
            ArgKind::SymmetricFunction => Some(Arity::SymmetricFunction),
            _ => None,
        }
    }
}

/// One-byte instruction codes, in wire order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::FromRepr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum OpCode {
    Padding,
    Sequence,
    GivenExists,
    GivenUnaryRelation,
    GivenBinaryRelation,
    GivenNullaryFunction,
    GivenInjectiveFunction,
    GivenBinaryFunction,
    GivenSymmetricFunction,
    LetsUnaryRelation,
    LetsBinaryRelationLhs,
    LetsBinaryRelationRhs,
    LetsInjectiveFunction,
    LetsInjectiveFunctionInverse,
    LetsBinaryFunctionLhs,
    LetsBinaryFunctionRhs,
    LetsSymmetricFunctionLhs,
    ForNeg,
    ForNegNeg,
    ForPosNeg,
    ForPosNegNeg,
    ForPosPos,
    ForPosPosNeg,
    ForPosPosNegNeg,
    ForPosPosPos,
    ForPosPosPosPos,
    ForPosPosPosPosPos,
    ForPosPosPosPosPosPos,
    ForAll,
    ForUnaryRelation,
    ForBinaryRelationLhs,
    ForBinaryRelationRhs,
    ForNullaryFunction,
    ForInjectiveFunction,
    ForInjectiveFunctionKey,
    ForInjectiveFunctionVal,
    ForBinaryFunctionLhs,
    ForBinaryFunctionRhs,
    ForBinaryFunctionVal,
    ForBinaryFunctionLhsVal,
    ForBinaryFunctionRhsVal,
    ForBinaryFunctionLhsRhs,
    ForSymmetricFunctionLhs,
    ForSymmetricFunctionVal,
    ForSymmetricFunctionLhsVal,
    ForSymmetricFunctionLhsRhs,
    ForBlock,
    IfBlock,
    IfEqual,
    IfUnaryRelation,
    IfBinaryRelation,
    IfNullaryFunction,
    IfInjectiveFunction,
    IfBinaryFunction,
    IfSymmetricFunction,
    LetNullaryFunction,
    LetInjectiveFunction,
    LetBinaryFunction,
    LetSymmetricFunction,
    InferEqual,
    InferUnaryRelation,
    InferBinaryRelation,
    InferNullaryFunction,
    InferInjectiveFunction,
    InferBinaryFunction,
    InferSymmetricFunction,
    InferNullaryNullary,
    InferNullaryInjective,
    InferNullaryBinary,
    InferNullarySymmetric,
    InferInjectiveInjective,
    InferInjectiveBinary,
    InferInjectiveSymmetric,
    InferBinaryBinary,
    InferBinarySymmetric,
    InferSymmetricSymmetric,
}

impl OpCode {
    /// Decodes a wire byte; `None` for bytes past the table.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Operand kind sequence of this op.
    pub fn arg_kinds(self) -> &'static [ArgKind] {
        use ArgKind::*;
        use OpCode::*;
        match self {
            Padding | ForBlock => &[],
            Sequence => &[Uint8],
            GivenExists | ForAll => &[NewOb],
            GivenUnaryRelation | ForUnaryRelation => &[UnaryRelation, NewOb],
            GivenBinaryRelation => &[BinaryRelation, NewOb, NewOb],
            GivenNullaryFunction | ForNullaryFunction => &[NullaryFunction, NewOb],
            GivenInjectiveFunction | ForInjectiveFunction => {
                &[InjectiveFunction, NewOb, NewOb]
            }
            GivenBinaryFunction => &[BinaryFunction, NewOb, NewOb, NewOb],
            GivenSymmetricFunction => &[SymmetricFunction, NewOb, NewOb, NewOb],
            LetsUnaryRelation => &[UnaryRelation, NewSet],
            LetsBinaryRelationLhs => &[BinaryRelation, Ob, NewSet],
            LetsBinaryRelationRhs => &[BinaryRelation, NewSet, Ob],
            LetsInjectiveFunction | LetsInjectiveFunctionInverse => {
                &[InjectiveFunction, NewSet]
            }
            LetsBinaryFunctionLhs => &[BinaryFunction, Ob, NewSet],
            LetsBinaryFunctionRhs => &[BinaryFunction, NewSet, Ob],
            LetsSymmetricFunctionLhs => &[SymmetricFunction, Ob, NewSet],
            ForNeg => &[NewOb, Set],
            ForNegNeg | ForPosNeg => &[NewOb, Set, Set],
            ForPosNegNeg | ForPosPosNeg => &[NewOb, Set, Set, Set],
            ForPosPos => &[NewOb, Set, Set],
            ForPosPosNegNeg | ForPosPosPosPos => &[NewOb, Set, Set, Set, Set],
            ForPosPosPos => &[NewOb, Set, Set, Set],
            ForPosPosPosPosPos => &[NewOb, Set, Set, Set, Set, Set],
            ForPosPosPosPosPosPos => &[NewOb, Set, Set, Set, Set, Set, Set],
            ForBinaryRelationLhs => &[BinaryRelation, Ob, NewOb],
            ForBinaryRelationRhs => &[BinaryRelation, NewOb, Ob],
            ForInjectiveFunctionKey => &[InjectiveFunction, Ob, NewOb],
            ForInjectiveFunctionVal => &[InjectiveFunction, NewOb, Ob],
            ForBinaryFunctionLhs => &[BinaryFunction, Ob, NewOb, NewOb],
            ForBinaryFunctionRhs => &[BinaryFunction, NewOb, Ob, NewOb],
            ForBinaryFunctionVal => &[BinaryFunction, NewOb, NewOb, Ob],
            ForBinaryFunctionLhsVal => &[BinaryFunction, Ob, NewOb, Ob],
            ForBinaryFunctionRhsVal => &[BinaryFunction, NewOb, Ob, Ob],
            ForBinaryFunctionLhsRhs => &[BinaryFunction, Ob, Ob, NewOb],
            ForSymmetricFunctionLhs => &[SymmetricFunction, Ob, NewOb, NewOb],
            ForSymmetricFunctionVal => &[SymmetricFunction, NewOb, NewOb, Ob],
            ForSymmetricFunctionLhsVal => &[SymmetricFunction, Ob, NewOb, Ob],
            ForSymmetricFunctionLhsRhs => &[SymmetricFunction, Ob, Ob, NewOb],
            IfBlock => &[Ob],
            IfEqual | InferEqual => &[Ob, Ob],
            IfUnaryRelation | InferUnaryRelation => &[UnaryRelation, Ob],
            IfBinaryRelation | InferBinaryRelation => &[BinaryRelation, Ob, Ob],
            IfNullaryFunction | InferNullaryFunction => &[NullaryFunction, Ob],
            IfInjectiveFunction | InferInjectiveFunction => &[InjectiveFunction, Ob, Ob],
            IfBinaryFunction | InferBinaryFunction => &[BinaryFunction, Ob, Ob, Ob],
            IfSymmetricFunction | InferSymmetricFunction => {
                &[SymmetricFunction, Ob, Ob, Ob]
            }
            LetNullaryFunction => &[NullaryFunction, NewOb],
            LetInjectiveFunction => &[InjectiveFunction, Ob, NewOb],
            LetBinaryFunction => &[BinaryFunction, Ob, Ob, NewOb],
            LetSymmetricFunction => &[SymmetricFunction, Ob, Ob, NewOb],
            InferNullaryNullary => &[NullaryFunction, NullaryFunction],
            InferNullaryInjective => &[NullaryFunction, InjectiveFunction, Ob],
            InferNullaryBinary => &[NullaryFunction, BinaryFunction, Ob, Ob],
            InferNullarySymmetric => &[NullaryFunction, SymmetricFunction, Ob, Ob],
            InferInjectiveInjective => &[InjectiveFunction, Ob, InjectiveFunction, Ob],
            InferInjectiveBinary => &[InjectiveFunction, Ob, BinaryFunction, Ob, Ob],
            InferInjectiveSymmetric => {
                &[InjectiveFunction, Ob, SymmetricFunction, Ob, Ob]
            }
            InferBinaryBinary => &[BinaryFunction, Ob, Ob, BinaryFunction, Ob, Ob],
            InferBinarySymmetric => &[BinaryFunction, Ob, Ob, SymmetricFunction, Ob, Ob],
            InferSymmetricSymmetric => {
                &[SymmetricFunction, Ob, Ob, SymmetricFunction, Ob, Ob]
            }
        }
    }

    /// Length in bytes of this op with its operands.
    pub fn encoded_len(self) -> usize {
        1 + self.arg_kinds().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn byte_round_trip() {
        for op in OpCode::iter() {
            assert_eq!(OpCode::from_byte(op.as_byte()), Some(op));
        }
        let last = OpCode::iter().last().unwrap().as_byte();
        assert_eq!(OpCode::from_byte(last + 1), None);
    }

    #[test]
    fn names_round_trip_in_wire_spelling() {
        for op in OpCode::iter() {
            let name = op.to_string();
            assert!(name.chars().all(|c| c.is_ascii_uppercase() || c == '_'
                || c.is_ascii_digit()));
            assert_eq!(name.parse::<OpCode>().unwrap(), op);
        }
        assert_eq!(
            "FOR_POS_POS_NEG_NEG".parse::<OpCode>().unwrap(),
            OpCode::ForPosPosNegNeg
        );
        assert!("FOR_POS".parse::<OpCode>().is_err());
    }

    #[test]
    fn givens_declare_their_event_registers() {
        assert_eq!(OpCode::GivenExists.arg_kinds(), &[ArgKind::NewOb]);
        assert_eq!(
            OpCode::GivenBinaryFunction.arg_kinds(),
            &[
                ArgKind::BinaryFunction,
                ArgKind::NewOb,
                ArgKind::NewOb,
                ArgKind::NewOb
            ]
        );
    }

    #[test]
    fn sequence_is_the_only_literal_op() {
        for op in OpCode::iter() {
            let has_literal = op.arg_kinds().contains(&ArgKind::Uint8);
            assert_eq!(has_literal, op == OpCode::Sequence);
        }
    }
}
