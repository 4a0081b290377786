//! Strength reduction of builtin calls with one constant operand.
//!
//! Where folding needs every operand constant, these rules fire on identity
//! and absorbing elements: `x + 0`, `x * 1`, `x & -1` and friends rewrite to
//! a plain continuation call without evaluating anything, and division by
//! one or remainder by plus or minus one lose their trap along with the
//! operation. A second family trades an operation for a cheaper one over
//! the same operands: a multiplication by a power of two becomes a shift,
//! multiplication or division by minus one becomes a negation, an exclusive
//! or with minus one becomes a complement, and `x ^ x` is zero outright.
//!
//! Division and remainder by a power of two stay untouched: an arithmetic
//! shift or mask rounds the wrong way for negative operands.

use anyhow::Result;
use cinder_cir::{
    BuiltinOp, CallId, CallShape, CirBuiltin, CirGraph, CirValue, ConstValue, ValueId, ValueKind,
};

use crate::foldable::Fold;
use crate::{TransformKind, TransformObserver};

/// What a matched rule rewrites the builtin call into.
enum Reduction {
    /// Pass an existing operand to the normal continuation.
    Operand(ValueId),
    /// Pass a constant to the normal continuation.
    Constant(ConstValue),
    /// Call a cheaper unary builtin on an existing operand, keeping both
    /// continuations.
    Cheaper(BuiltinOp, ValueId),
    /// Shift an existing operand left by a constant number of bits.
    Shift(BuiltinOp, ValueId, i32),
}

/// Try to strength-reduce `call`. On success the call is rewritten in place
/// into a call of its normal continuation or of a cheaper builtin.
pub fn try_reduce(
    g: &mut CirGraph,
    observer: &mut dyn TransformObserver,
    call: CallId,
) -> Result<Fold> {
    let CirValue::Builtin(b) = g.value(g.calls[call].procedure) else {
        return Ok(Fold::Unchanged);
    };
    let op = b.op;
    let n = op.value_arity();
    let args = &g.calls[call].arguments;
    if args.len() != n + 2 {
        // Arity errors are caught by verification; nothing to reduce here.
        return Ok(Fold::Unchanged);
    }
    let k = args[n];
    let ke = args[n + 1];
    let Some(reduction) = match_rule(g, op, &args[..n]) else {
        return Ok(Fold::Unchanged);
    };
    let shape = match reduction {
        Reduction::Operand(v) => CallShape::new(k, vec![v]),
        Reduction::Constant(c) => {
            let v = g.constant(c);
            CallShape::new(k, vec![v])
        }
        Reduction::Cheaper(cheap, operand) => {
            let procedure = g.builtin(CirBuiltin::new(cheap));
            CallShape::new(procedure, vec![operand, k, ke])
        }
        Reduction::Shift(cheap, operand, bits) => {
            let procedure = g.builtin(CirBuiltin::new(cheap));
            let amount = g.constant(ConstValue::Int(bits));
            CallShape::new(procedure, vec![operand, amount, k, ke])
        }
    };
    observer.notify_before(TransformKind::Reducing, call);
    g.assign_call(call, shape);
    observer.notify_after(TransformKind::Reducing, call);
    Ok(Fold::Folded)
}

fn match_rule(g: &CirGraph, op: BuiltinOp, args: &[ValueId]) -> Option<Reduction> {
    use BuiltinOp::*;
    let zero = |i: usize| g.as_constant(args[i]).is_some_and(ConstValue::is_zero);
    let one = |i: usize| {
        g.as_constant(args[i])
            .and_then(ConstValue::to_long)
            .is_some_and(|v| v == 1)
    };
    let all_ones = |i: usize| g.as_constant(args[i]).is_some_and(ConstValue::is_all_ones);
    let zero_of = |op: BuiltinOp| match op.result_kind() {
        ValueKind::Long => ConstValue::Long(0),
        _ => ConstValue::Int(0),
    };
    let ones_of = |op: BuiltinOp| match op.result_kind() {
        ValueKind::Long => ConstValue::Long(-1),
        _ => ConstValue::Int(-1),
    };
    // The shift count for `x * 2^n -> x << n`; factors 0, 1 and -1 have
    // their own rules, so only n >= 1 matters here.
    let power_of_two = |i: usize| {
        g.as_constant(args[i])
            .and_then(ConstValue::to_long)
            .filter(|v| *v > 1 && (v & (v - 1)) == 0)
            .map(|v| v.trailing_zeros() as i32)
    };
    let negated_of = |op: BuiltinOp| match op.result_kind() {
        ValueKind::Long => LongNegated,
        _ => IntNegated,
    };
    let not_of = |op: BuiltinOp| match op.result_kind() {
        ValueKind::Long => LongNot,
        _ => IntNot,
    };
    let shift_of = |op: BuiltinOp| match op.result_kind() {
        ValueKind::Long => LongShiftedLeft,
        _ => IntShiftedLeft,
    };
    match op {
        IntPlus | LongPlus => {
            if zero(1) {
                Some(Reduction::Operand(args[0]))
            } else if zero(0) {
                Some(Reduction::Operand(args[1]))
            } else {
                None
            }
        }
        IntMinus | LongMinus => {
            if zero(1) {
                Some(Reduction::Operand(args[0]))
            } else if zero(0) {
                Some(Reduction::Cheaper(negated_of(op), args[1]))
            } else {
                None
            }
        }
        IntTimes | LongTimes => {
            if zero(0) || zero(1) {
                Some(Reduction::Constant(zero_of(op)))
            } else if one(1) {
                Some(Reduction::Operand(args[0]))
            } else if one(0) {
                Some(Reduction::Operand(args[1]))
            } else if all_ones(1) {
                Some(Reduction::Cheaper(negated_of(op), args[0]))
            } else if all_ones(0) {
                Some(Reduction::Cheaper(negated_of(op), args[1]))
            } else if let Some(n) = power_of_two(1) {
                Some(Reduction::Shift(shift_of(op), args[0], n))
            } else if let Some(n) = power_of_two(0) {
                Some(Reduction::Shift(shift_of(op), args[1], n))
            } else {
                None
            }
        }
        IntDivided | LongDivided => {
            if one(1) {
                Some(Reduction::Operand(args[0]))
            } else if all_ones(1) {
                // Division by -1 wraps exactly like negation does.
                Some(Reduction::Cheaper(negated_of(op), args[0]))
            } else {
                None
            }
        }
        IntRemainder | LongRemainder => {
            (one(1) || all_ones(1)).then(|| Reduction::Constant(zero_of(op)))
        }
        IntAnd | LongAnd => {
            if zero(0) || zero(1) {
                Some(Reduction::Constant(zero_of(op)))
            } else if all_ones(1) {
                Some(Reduction::Operand(args[0]))
            } else if all_ones(0) {
                Some(Reduction::Operand(args[1]))
            } else {
                None
            }
        }
        IntOr | LongOr => {
            if all_ones(0) || all_ones(1) {
                Some(Reduction::Constant(ones_of(op)))
            } else if zero(1) {
                Some(Reduction::Operand(args[0]))
            } else if zero(0) {
                Some(Reduction::Operand(args[1]))
            } else {
                None
            }
        }
        IntXor | LongXor => {
            if g.same_argument(args[0], args[1]) {
                Some(Reduction::Constant(zero_of(op)))
            } else if zero(1) {
                Some(Reduction::Operand(args[0]))
            } else if zero(0) {
                Some(Reduction::Operand(args[1]))
            } else if all_ones(1) {
                Some(Reduction::Cheaper(not_of(op), args[0]))
            } else if all_ones(0) {
                Some(Reduction::Cheaper(not_of(op), args[1]))
            } else {
                None
            }
        }
        IntShiftedLeft | IntUnsignedShiftedRight | LongShiftedLeft | LongUnsignedShiftedRight => {
            if zero(1) {
                Some(Reduction::Operand(args[0]))
            } else if zero(0) {
                Some(Reduction::Constant(zero_of(op)))
            } else {
                None
            }
        }
        IntNegated | IntNot | LongNegated | LongNot | ConvertLongToInt => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_cir::{CirBuiltin, VarRole};
    use crate::NullObserver;

    fn reduce_call(g: &mut CirGraph, op: BuiltinOp, args: Vec<ValueId>) -> (CallId, ValueId) {
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ke = g.new_var(ValueKind::Reference, VarRole::ExceptionContinuation);
        let ku = g.use_var(k);
        let keu = g.use_var(ke);
        let b = g.builtin(CirBuiltin::new(op));
        let mut all = args;
        all.push(ku);
        all.push(keu);
        (g.call(b, all), ku)
    }

    #[test]
    fn additive_identity() {
        let mut g = CirGraph::new();
        let x = g.new_var(ValueKind::Int, VarRole::Local);
        let xu = g.use_var(x);
        let zero = g.constant(ConstValue::Int(0));
        let (call, ku) = reduce_call(&mut g, BuiltinOp::IntPlus, vec![xu, zero]);
        assert!(try_reduce(&mut g, &mut NullObserver, call).unwrap().folded());
        assert_eq!(g.calls[call].procedure, ku);
        assert_eq!(g.calls[call].arguments, vec![xu]);
    }

    #[test]
    fn multiplicative_absorption_and_identity() {
        let mut g = CirGraph::new();
        let x = g.new_var(ValueKind::Long, VarRole::Local);
        let xu = g.use_var(x);
        let zero = g.constant(ConstValue::Long(0));
        let (by_zero, _) = reduce_call(&mut g, BuiltinOp::LongTimes, vec![xu, zero]);
        assert!(try_reduce(&mut g, &mut NullObserver, by_zero).unwrap().folded());
        assert_eq!(
            g.as_constant(g.calls[by_zero].arguments[0]),
            Some(&ConstValue::Long(0))
        );

        let one = g.constant(ConstValue::Long(1));
        let (by_one, _) = reduce_call(&mut g, BuiltinOp::LongTimes, vec![one, xu]);
        assert!(try_reduce(&mut g, &mut NullObserver, by_one).unwrap().folded());
        assert_eq!(g.calls[by_one].arguments, vec![xu]);
    }

    #[test]
    fn division_by_one_drops_the_trap_with_the_operation() {
        let mut g = CirGraph::new();
        let x = g.new_var(ValueKind::Int, VarRole::Local);
        let xu = g.use_var(x);
        let one = g.constant(ConstValue::Int(1));
        let (call, ku) = reduce_call(&mut g, BuiltinOp::IntDivided, vec![xu, one]);
        assert!(try_reduce(&mut g, &mut NullObserver, call).unwrap().folded());
        assert_eq!(g.calls[call].procedure, ku);
        assert_eq!(g.calls[call].arguments, vec![xu]);
    }

    fn builtin_op(g: &CirGraph, call: CallId) -> BuiltinOp {
        match g.value(g.calls[call].procedure) {
            CirValue::Builtin(b) => b.op,
            other => panic!("procedure is {other:?}, not a builtin"),
        }
    }

    #[test]
    fn multiplication_by_power_of_two_becomes_shift() {
        // Exact under wrapping semantics, negative operands included.
        for x in [-3i32, i32::MIN, 7] {
            assert_eq!(x.wrapping_mul(8), x.wrapping_shl(3));
        }

        let mut g = CirGraph::new();
        let x = g.new_var(ValueKind::Int, VarRole::Local);
        let xu = g.use_var(x);
        let eight = g.constant(ConstValue::Int(8));
        let (call, _) = reduce_call(&mut g, BuiltinOp::IntTimes, vec![xu, eight]);
        assert!(try_reduce(&mut g, &mut NullObserver, call).unwrap().folded());
        assert_eq!(builtin_op(&g, call), BuiltinOp::IntShiftedLeft);
        let args = &g.calls[call].arguments;
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], xu);
        assert_eq!(g.as_constant(args[1]), Some(&ConstValue::Int(3)));

        // The long variant shifts too; the count stays an int.
        let y = g.new_var(ValueKind::Long, VarRole::Local);
        let yu = g.use_var(y);
        let four = g.constant(ConstValue::Long(4));
        let (lcall, _) = reduce_call(&mut g, BuiltinOp::LongTimes, vec![four, yu]);
        assert!(try_reduce(&mut g, &mut NullObserver, lcall).unwrap().folded());
        assert_eq!(builtin_op(&g, lcall), BuiltinOp::LongShiftedLeft);
        assert_eq!(g.calls[lcall].arguments[0], yu);
        assert_eq!(
            g.as_constant(g.calls[lcall].arguments[1]),
            Some(&ConstValue::Int(2))
        );
    }

    #[test]
    fn negation_rewrites() {
        let mut g = CirGraph::new();
        let x = g.new_var(ValueKind::Int, VarRole::Local);
        let xu = g.use_var(x);
        let zero = g.constant(ConstValue::Int(0));
        let minus_one = g.constant(ConstValue::Int(-1));

        let (sub, _) = reduce_call(&mut g, BuiltinOp::IntMinus, vec![zero, xu]);
        assert!(try_reduce(&mut g, &mut NullObserver, sub).unwrap().folded());
        assert_eq!(builtin_op(&g, sub), BuiltinOp::IntNegated);
        assert_eq!(g.calls[sub].arguments[0], xu);

        let (mul, _) = reduce_call(&mut g, BuiltinOp::IntTimes, vec![xu, minus_one]);
        assert!(try_reduce(&mut g, &mut NullObserver, mul).unwrap().folded());
        assert_eq!(builtin_op(&g, mul), BuiltinOp::IntNegated);
        assert_eq!(g.calls[mul].arguments[0], xu);

        let (div, _) = reduce_call(&mut g, BuiltinOp::IntDivided, vec![xu, minus_one]);
        assert!(try_reduce(&mut g, &mut NullObserver, div).unwrap().folded());
        assert_eq!(builtin_op(&g, div), BuiltinOp::IntNegated);
        assert_eq!(g.calls[div].arguments[0], xu);
    }

    #[test]
    fn xor_complement_and_self_annihilation() {
        let mut g = CirGraph::new();
        let x = g.new_var(ValueKind::Int, VarRole::Local);
        let xu = g.use_var(x);
        let minus_one = g.constant(ConstValue::Int(-1));

        let (not, _) = reduce_call(&mut g, BuiltinOp::IntXor, vec![minus_one, xu]);
        assert!(try_reduce(&mut g, &mut NullObserver, not).unwrap().folded());
        assert_eq!(builtin_op(&g, not), BuiltinOp::IntNot);
        assert_eq!(g.calls[not].arguments[0], xu);

        let (zeroed, ku) = reduce_call(&mut g, BuiltinOp::IntXor, vec![xu, xu]);
        assert!(try_reduce(&mut g, &mut NullObserver, zeroed).unwrap().folded());
        assert_eq!(g.calls[zeroed].procedure, ku);
        assert_eq!(
            g.as_constant(g.calls[zeroed].arguments[0]),
            Some(&ConstValue::Int(0))
        );
    }

    #[test]
    fn remainder_by_unit_magnitudes_is_zero() {
        let mut g = CirGraph::new();
        let x = g.new_var(ValueKind::Long, VarRole::Local);
        let xu = g.use_var(x);
        let minus_one = g.constant(ConstValue::Long(-1));
        let (call, ku) = reduce_call(&mut g, BuiltinOp::LongRemainder, vec![xu, minus_one]);
        assert!(try_reduce(&mut g, &mut NullObserver, call).unwrap().folded());
        assert_eq!(g.calls[call].procedure, ku);
        assert_eq!(
            g.as_constant(g.calls[call].arguments[0]),
            Some(&ConstValue::Long(0))
        );
    }

    #[test]
    fn masking_rules() {
        let mut g = CirGraph::new();
        let x = g.new_var(ValueKind::Int, VarRole::Local);
        let xu = g.use_var(x);
        let ones = g.constant(ConstValue::Int(-1));
        let (and_ones, _) = reduce_call(&mut g, BuiltinOp::IntAnd, vec![xu, ones]);
        assert!(try_reduce(&mut g, &mut NullObserver, and_ones).unwrap().folded());
        assert_eq!(g.calls[and_ones].arguments, vec![xu]);

        let (or_ones, _) = reduce_call(&mut g, BuiltinOp::IntOr, vec![xu, ones]);
        assert!(try_reduce(&mut g, &mut NullObserver, or_ones).unwrap().folded());
        assert_eq!(
            g.as_constant(g.calls[or_ones].arguments[0]),
            Some(&ConstValue::Int(-1))
        );
    }

    #[test]
    fn no_rule_no_rewrite() {
        let mut g = CirGraph::new();
        let x = g.new_var(ValueKind::Int, VarRole::Local);
        let xu = g.use_var(x);
        let two = g.constant(ConstValue::Int(2));
        let (call, _) = reduce_call(&mut g, BuiltinOp::IntPlus, vec![xu, two]);
        let before = g.calls[call].clone();
        assert!(!try_reduce(&mut g, &mut NullObserver, call).unwrap().folded());
        assert_eq!(g.calls[call], before);
    }
}
