//! Compile-time evaluation of calls with fully constant operands.
//!
//! Three call shapes fold: builtin calls (evaluated right here, the
//! arithmetic below is the meta-evaluation of the primitives), method calls
//! declared foldable (delegated to the [`MetaEvaluate`] collaborator), and
//! switches over a constant tag. A successful fold rewrites the call in
//! place into a call of the appropriate continuation.
//!
//! A meta-evaluated method may legitimately terminate by throwing; that is
//! an [`Outcome::Thrown`] and the rewrite targets the exception continuation
//! with the thrown object. An `Err` from the collaborator is an
//! infrastructure failure, not a program outcome: the fold is skipped and
//! the call left untouched.

use anyhow::{Result, bail};
use cinder_cir::{
    BuiltinOp, CallId, CallShape, CirBuiltin, CirGraph, CirValue, ConstValue, MethodRef, Variant,
};
use tracing::debug;

use crate::{TransformKind, TransformObserver};

/// How a meta-evaluated invocation terminated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome {
    /// Returned normally with a value.
    Value(ConstValue),
    /// Returned normally without a value (a `void` method or constructor).
    Void,
    /// Terminated by throwing; carries the thrown object.
    Thrown(ConstValue),
}

/// Collaborator that executes foldable methods at compile time.
pub trait MetaEvaluate {
    /// Whether `method` may be invoked at compile time when all its
    /// arguments are constants.
    fn is_foldable(&self, method: MethodRef) -> bool;

    /// Execute `method` on the given constant arguments. `Err` means the
    /// evaluation infrastructure itself failed and the fold must be skipped.
    fn invoke(&mut self, method: MethodRef, args: &[ConstValue]) -> Result<Outcome>;
}

/// An evaluator that folds nothing. Useful when no runtime services are
/// available.
pub struct NoEvaluation;

impl MetaEvaluate for NoEvaluation {
    fn is_foldable(&self, _method: MethodRef) -> bool {
        false
    }

    fn invoke(&mut self, _method: MethodRef, _args: &[ConstValue]) -> Result<Outcome> {
        bail!("meta-evaluation is not available")
    }
}

/// Result of a fold attempt on one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fold {
    Unchanged,
    Folded,
}

impl Fold {
    pub fn folded(&self) -> bool {
        *self == Fold::Folded
    }
}

/// Try to fold `call`. On success the call is rewritten in place into a
/// continuation call and `Fold::Folded` is returned.
pub fn try_fold(
    g: &mut CirGraph,
    evaluator: &mut dyn MetaEvaluate,
    observer: &mut dyn TransformObserver,
    call: CallId,
) -> Result<Fold> {
    let shape = match g.value(g.calls[call].procedure) {
        CirValue::Builtin(b) => {
            let b = *b;
            plan_fold_builtin(g, call, b)?
        }
        CirValue::Method(m) => {
            let m = *m;
            plan_fold_method(g, evaluator, call, m)?
        }
        CirValue::Switch(s) => {
            let matches = s.matches;
            plan_fold_switch(g, call, matches)?
        }
        _ => None,
    };
    let Some(shape) = shape else {
        return Ok(Fold::Unchanged);
    };
    observer.notify_before(TransformKind::Folding, call);
    g.assign_call(call, shape);
    observer.notify_after(TransformKind::Folding, call);
    Ok(Fold::Folded)
}

fn plan_fold_builtin(
    g: &mut CirGraph,
    call: CallId,
    b: CirBuiltin,
) -> Result<Option<CallShape>> {
    let n = b.op.value_arity();
    let args = &g.calls[call].arguments;
    if args.len() != b.arity() {
        bail!("builtin {:?} of arity {} called with {} arguments", b.op, b.arity(), args.len());
    }
    let mut consts = Vec::with_capacity(n);
    for &a in &args[..n] {
        match g.as_constant(a) {
            Some(c) => consts.push(*c),
            None => return Ok(None),
        }
    }
    // A zero divisor would trap at runtime; leave the call and its check in
    // place rather than synthesizing the throw here.
    if b.op.is_division() && consts[1].is_zero() {
        return Ok(None);
    }
    if b.variant == Variant::FoldableWhenNotZero && consts[n - 1].is_zero() {
        return Ok(None);
    }
    let Some(result) = eval_builtin(b.op, &consts) else {
        return Ok(None);
    };
    let k = g.calls[call].arguments[n];
    let result = g.constant(result);
    Ok(Some(CallShape::new(k, vec![result])))
}

fn plan_fold_method(
    g: &mut CirGraph,
    evaluator: &mut dyn MetaEvaluate,
    call: CallId,
    m: MethodRef,
) -> Result<Option<CallShape>> {
    if !evaluator.is_foldable(m) {
        return Ok(None);
    }
    // Layout: value arguments, then the normal and exception continuations.
    let args = g.calls[call].arguments.clone();
    let Some(split) = args.len().checked_sub(2) else {
        bail!("method call without continuation operands");
    };
    let (normal, exception) = (args[split], args[split + 1]);
    let mut consts = Vec::with_capacity(split);
    for &a in &args[..split] {
        match g.as_constant(a) {
            Some(c) => consts.push(*c),
            None => return Ok(None),
        }
    }
    let shape = match evaluator.invoke(m, &consts) {
        Ok(Outcome::Value(v)) => {
            let v = g.constant(v);
            CallShape::new(normal, vec![v])
        }
        Ok(Outcome::Void) => CallShape::new(normal, vec![]),
        Ok(Outcome::Thrown(e)) => {
            let e = g.constant(e);
            CallShape::new(exception, vec![e])
        }
        Err(err) => {
            debug!(method = m.0, error = %err, "meta-evaluation unavailable, fold skipped");
            return Ok(None);
        }
    };
    Ok(Some(shape))
}

fn plan_fold_switch(g: &mut CirGraph, call: CallId, matches: usize) -> Result<Option<CallShape>> {
    let args = g.calls[call].arguments.clone();
    if args.len() != 2 * matches + 2 {
        bail!("switch of {} matches called with {} arguments", matches, args.len());
    }
    let Some(tag) = g.as_constant(args[0]).and_then(|c| c.to_long()) else {
        return Ok(None);
    };
    let mut target = args[2 * matches + 1];
    for i in 0..matches {
        let Some(m) = g.as_constant(args[1 + i]).and_then(|c| c.to_long()) else {
            return Ok(None);
        };
        if m == tag {
            target = args[1 + matches + i];
            break;
        }
    }
    Ok(Some(CallShape::new(target, vec![])))
}

/// Evaluate one builtin on constant operands. `None` means the operands do
/// not have the kinds the operator expects, which a well-formed graph never
/// produces.
fn eval_builtin(op: BuiltinOp, args: &[ConstValue]) -> Option<ConstValue> {
    use BuiltinOp::*;
    let int = |i: usize| args.get(i).and_then(ConstValue::to_int);
    let long = |i: usize| args.get(i).and_then(ConstValue::to_long);
    Some(match op {
        IntPlus => ConstValue::Int(int(0)?.wrapping_add(int(1)?)),
        IntMinus => ConstValue::Int(int(0)?.wrapping_sub(int(1)?)),
        IntTimes => ConstValue::Int(int(0)?.wrapping_mul(int(1)?)),
        IntDivided => ConstValue::Int(int(0)?.wrapping_div(int(1)?)),
        IntRemainder => ConstValue::Int(int(0)?.wrapping_rem(int(1)?)),
        IntAnd => ConstValue::Int(int(0)? & int(1)?),
        IntOr => ConstValue::Int(int(0)? | int(1)?),
        IntXor => ConstValue::Int(int(0)? ^ int(1)?),
        IntNegated => ConstValue::Int(int(0)?.wrapping_neg()),
        IntNot => ConstValue::Int(!int(0)?),
        IntShiftedLeft => ConstValue::Int(int(0)?.wrapping_shl(int(1)? as u32)),
        IntUnsignedShiftedRight => {
            ConstValue::Int(((int(0)? as u32) >> (int(1)? as u32 & 0x1f)) as i32)
        }
        LongPlus => ConstValue::Long(long(0)?.wrapping_add(long(1)?)),
        LongMinus => ConstValue::Long(long(0)?.wrapping_sub(long(1)?)),
        LongTimes => ConstValue::Long(long(0)?.wrapping_mul(long(1)?)),
        LongDivided => ConstValue::Long(long(0)?.wrapping_div(long(1)?)),
        LongRemainder => ConstValue::Long(long(0)?.wrapping_rem(long(1)?)),
        LongAnd => ConstValue::Long(long(0)? & long(1)?),
        LongOr => ConstValue::Long(long(0)? | long(1)?),
        LongXor => ConstValue::Long(long(0)? ^ long(1)?),
        LongNegated => ConstValue::Long(long(0)?.wrapping_neg()),
        LongNot => ConstValue::Long(!long(0)?),
        LongShiftedLeft => ConstValue::Long(long(0)?.wrapping_shl(int(1)? as u32)),
        LongUnsignedShiftedRight => {
            ConstValue::Long(((long(0)? as u64) >> (int(1)? as u32 & 0x3f)) as i64)
        }
        ConvertLongToInt => ConstValue::Int(long(0)? as i32),
    })
}
