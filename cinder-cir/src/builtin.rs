//! Builtin procedures: the primitive operators of the IR.
//!
//! A builtin call has the shape `op(v₁, …, vₙ, k, kϵ)`: its value operands
//! followed by the normal and the exception continuation. Every builtin
//! exists in up to three variants. The `Normal` variant is what bytecode
//! translation emits; the `Foldable` variants are substituted by the
//! builtin-variant pass and declare under which condition the operator may be
//! meta-evaluated at compile time.

use crate::lit::ValueKind;

/// The primitive operations the optimizer understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuiltinOp {
    IntPlus,
    IntMinus,
    IntTimes,
    IntDivided,
    IntRemainder,
    IntAnd,
    IntOr,
    IntXor,
    IntNegated,
    IntNot,
    IntShiftedLeft,
    IntUnsignedShiftedRight,
    LongPlus,
    LongMinus,
    LongTimes,
    LongDivided,
    LongRemainder,
    LongAnd,
    LongOr,
    LongXor,
    LongNegated,
    LongNot,
    LongShiftedLeft,
    LongUnsignedShiftedRight,
    ConvertLongToInt,
}

impl BuiltinOp {
    /// Number of value operands, not counting the two continuations.
    pub fn value_arity(&self) -> usize {
        match self {
            BuiltinOp::IntNegated
            | BuiltinOp::IntNot
            | BuiltinOp::LongNegated
            | BuiltinOp::LongNot
            | BuiltinOp::ConvertLongToInt => 1,
            _ => 2,
        }
    }

    pub fn result_kind(&self) -> ValueKind {
        match self {
            BuiltinOp::LongPlus
            | BuiltinOp::LongMinus
            | BuiltinOp::LongTimes
            | BuiltinOp::LongDivided
            | BuiltinOp::LongRemainder
            | BuiltinOp::LongAnd
            | BuiltinOp::LongOr
            | BuiltinOp::LongXor
            | BuiltinOp::LongNegated
            | BuiltinOp::LongNot
            | BuiltinOp::LongShiftedLeft
            | BuiltinOp::LongUnsignedShiftedRight => ValueKind::Long,
            _ => ValueKind::Int,
        }
    }

    /// Division-like ops trap on a zero second operand.
    pub fn is_division(&self) -> bool {
        matches!(
            self,
            BuiltinOp::IntDivided
                | BuiltinOp::IntRemainder
                | BuiltinOp::LongDivided
                | BuiltinOp::LongRemainder
        )
    }
}

/// Which foldability contract a builtin node currently declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variant {
    Normal,
    /// Meta-evaluable whenever all value operands are constants.
    Foldable,
    /// Meta-evaluable when additionally the second operand is non-zero.
    FoldableWhenNotZero,
}

/// A builtin procedure node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CirBuiltin {
    pub op: BuiltinOp,
    pub variant: Variant,
}

impl CirBuiltin {
    pub fn new(op: BuiltinOp) -> Self {
        CirBuiltin {
            op,
            variant: Variant::Normal,
        }
    }

    /// Total call arity: value operands plus the two continuations.
    pub fn arity(&self) -> usize {
        self.op.value_arity() + 2
    }

    /// The declared variant counterpart used by the builtin-variant pass.
    ///
    /// `FoldableWhenNotZero` only exists for division-like ops; any other op
    /// declares the plain `Foldable` counterpart instead.
    pub fn with_variant(&self, requested: Variant) -> CirBuiltin {
        let variant = match requested {
            Variant::Normal => Variant::Normal,
            Variant::FoldableWhenNotZero if self.op.is_division() => Variant::FoldableWhenNotZero,
            _ => Variant::Foldable,
        };
        CirBuiltin {
            op: self.op,
            variant,
        }
    }
}
