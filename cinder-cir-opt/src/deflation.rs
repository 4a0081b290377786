//! Deflation: the local rewrite loop that shrinks a graph.
//!
//! One pass walks every reachable call and tries, in order: constant
//! folding, strength reduction, beta-reduction of literal closure and
//! continuation calls, and collapse of trivial forwarding wrappers in
//! argument position. Passes repeat until none of them fires; each rewrite
//! strictly consumes structure, so the loop terminates.

use anyhow::{Result, ensure};
use cinder_cir::walk::{Substitution, reachable_calls, trivial_wrapper_target};
use cinder_cir::{CallId, CirGraph, CirValue, ValueId, Variant};
use tracing::debug;

use crate::foldable::try_fold;
use crate::reduce::try_reduce;
use crate::{OptCx, TransformKind, TransformObserver};

/// Run deflation to a local fixed point. Returns the number of rewrites
/// performed.
pub fn deflate(g: &mut CirGraph, cx: &mut OptCx<'_>, root: ValueId) -> Result<usize> {
    let mut total = 0;
    loop {
        let mut changed = 0;
        for call in reachable_calls(g, root) {
            if try_fold(g, cx.evaluator, cx.observer, call)?.folded() {
                changed += 1;
                continue;
            }
            if try_reduce(g, cx.observer, call)?.folded() {
                changed += 1;
                continue;
            }
            if beta_reduce(g, cx.observer, call)? {
                changed += 1;
                continue;
            }
            changed += collapse_wrappers(g, cx.observer, call);
        }
        if changed == 0 {
            break;
        }
        total += changed;
    }
    if total > 0 {
        debug!(rewrites = total, "deflation converged");
    }
    Ok(total)
}

/// Replace every reachable builtin procedure node by its `requested`
/// foldability variant. Returns the number of substitutions, so callers can
/// decide whether another deflation round is worthwhile.
pub fn substitute_builtin_variants(
    g: &mut CirGraph,
    observer: &mut dyn TransformObserver,
    root: ValueId,
    requested: Variant,
) -> usize {
    let mut substituted = 0;
    for call in reachable_calls(g, root) {
        let CirValue::Builtin(b) = g.value(g.calls[call].procedure) else {
            continue;
        };
        let replacement = b.with_variant(requested);
        if replacement == *b {
            continue;
        }
        // Builtin values may be shared; rewrite this call to a fresh node.
        let fresh = g.builtin(replacement);
        let mut shape = g.calls[call].shape();
        shape.procedure = fresh;
        observer.notify_before(TransformKind::BuiltinVariant, call);
        g.assign_call(call, shape);
        observer.notify_after(TransformKind::BuiltinVariant, call);
        substituted += 1;
    }
    if substituted > 0 {
        debug!(substituted, ?requested, "builtin variants substituted");
    }
    substituted
}

/// Beta-reduce a call of a literal closure or continuation: substitute the
/// arguments for the parameters throughout the body, then splice the body
/// call over the call itself.
fn beta_reduce(
    g: &mut CirGraph,
    observer: &mut dyn TransformObserver,
    call: CallId,
) -> Result<bool> {
    let procedure = g.calls[call].procedure;
    let (parameters, body) = match g.value(procedure) {
        CirValue::Closure(cl) => (cl.parameters.clone(), cl.body),
        CirValue::Continuation(k) => (k.parameter.into_iter().collect(), k.body),
        _ => return Ok(false),
    };
    let arguments = g.calls[call].arguments.clone();
    ensure!(
        arguments.len() == parameters.len(),
        "target of {} parameters called with {} arguments",
        parameters.len(),
        arguments.len()
    );
    let mut s = Substitution::new();
    for (p, a) in parameters.into_iter().zip(arguments) {
        s.bind(p, a);
    }
    observer.notify_before(TransformKind::BetaReduction, call);
    s.apply(g, body);
    g.splice_body(call, body);
    observer.notify_after(TransformKind::BetaReduction, call);
    Ok(true)
}

/// Collapse trivial forwarding wrappers among the call's arguments:
/// a closure `λ(p…). f(p…)` or continuation `⟨x⟩ k(x)` passed as an operand
/// is replaced by its target. Returns the number of slots rewritten.
fn collapse_wrappers(
    g: &mut CirGraph,
    observer: &mut dyn TransformObserver,
    call: CallId,
) -> usize {
    let mut collapsed = 0;
    for i in 0..g.calls[call].arguments.len() {
        let a = g.calls[call].arguments[i];
        if let Some(target) = wrapper_target(g, a) {
            observer.notify_before(TransformKind::Deflation, call);
            g.calls[call].arguments[i] = target;
            observer.notify_after(TransformKind::Deflation, call);
            collapsed += 1;
        }
    }
    collapsed
}

fn wrapper_target(g: &CirGraph, v: ValueId) -> Option<ValueId> {
    if let Some(t) = trivial_wrapper_target(g, v) {
        return Some(t);
    }
    let CirValue::Continuation(k) = g.value(v) else {
        return None;
    };
    let body = &g.calls[k.body];
    let forwards = match k.parameter {
        Some(p) => {
            body.arguments.len() == 1
                && g.as_variable(body.arguments[0]) == Some(p)
                && g.as_variable(body.procedure) != Some(p)
        }
        None => body.arguments.is_empty(),
    };
    forwards.then_some(body.procedure)
}
