//! Nullness analysis and null-check removal.
//!
//! A four-point lattice tracks, per reference value, whether it is known
//! null, known initialized (allocated and therefore non-null), or neither.
//! An allocation's normal continuation receives an initialized result, and
//! any operator that dereferences its receiver proves the receiver
//! initialized on the normal path (the null case would have taken the
//! exception continuation instead). Where the analysis proves a receiver
//! initialized, the operator's `NULL_POINTER` trap flag is stripped so
//! lowering emits no runtime check.

use anyhow::Result;
use cinder_cir::walk::reachable_calls;
use cinder_cir::{CallId, CirCall, CirGraph, CirValue, ConstValue, JavaOp, Traps, ValueId, VarRole};
use tracing::debug;

use crate::dfa::{Dfa, OperatorSemantics};
use crate::domain::ValueDomain;
use crate::env::Environment;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Nullness {
    /// No information yet.
    Top,
    /// Known to be the null reference.
    Null,
    /// Known allocated, hence non-null.
    Initialized,
    /// Could be anything.
    Bottom,
}

pub struct NullnessDomain;

impl ValueDomain for NullnessDomain {
    type Elem = Nullness;

    fn top(&self) -> Nullness {
        Nullness::Top
    }

    fn bottom(&self) -> Nullness {
        Nullness::Bottom
    }

    fn is_top(&self, e: &Nullness) -> bool {
        *e == Nullness::Top
    }

    fn is_bottom(&self, e: &Nullness) -> bool {
        *e == Nullness::Bottom
    }

    fn meet_nontrivial(&self, a: &Nullness, b: &Nullness) -> Nullness {
        // Null and Initialized are the only distinct non-trivial pair.
        if a == b { *a } else { Nullness::Bottom }
    }

    fn eq_nontrivial(&self, a: &Nullness, b: &Nullness) -> bool {
        a == b
    }

    fn le_nontrivial(&self, _a: &Nullness, _b: &Nullness) -> bool {
        false
    }

    fn from_constant(&self, c: &ConstValue) -> Nullness {
        match c {
            ConstValue::Null => Nullness::Null,
            ConstValue::Object(_) => Nullness::Initialized,
            // Non-reference constants never feed a null check.
            _ => Nullness::Bottom,
        }
    }
}

/// The normal/exception continuation operands of a call, in that order.
/// Literal continuations are classified by position, continuation variables
/// by their binding role.
fn continuation_operands(g: &CirGraph, c: &CirCall) -> (Option<ValueId>, Option<ValueId>) {
    let mut normal = None;
    let mut exception = None;
    for &a in &c.arguments {
        match g.value(a) {
            CirValue::Variable(v) => match g.vars[*v].role {
                VarRole::NormalContinuation => normal = normal.or(Some(a)),
                VarRole::ExceptionContinuation => exception = exception.or(Some(a)),
                VarRole::Local => {}
            },
            CirValue::Continuation(_) | CirValue::Undefined => {
                if normal.is_none() {
                    normal = Some(a);
                } else if exception.is_none() {
                    exception = Some(a);
                }
            }
            _ => {}
        }
    }
    (normal, exception)
}

struct NullnessSemantics;

impl OperatorSemantics<NullnessDomain> for NullnessSemantics {
    fn analyze_operator_call(
        &mut self,
        dfa: &mut Dfa<'_, NullnessDomain>,
        call: CallId,
        op: &JavaOp,
        _args: &[Nullness],
        env: &Environment<Nullness>,
    ) -> Result<()> {
        let g = dfa.graph();
        let c = &g.calls[call];
        let (normal, exception) = continuation_operands(g, c);
        // On the normal path a dereferencing operator has proven its
        // receiver non-null; rebind it so later checks on the same variable
        // are removed too.
        let mut normal_env = env.clone();
        if op.requires_receiver() {
            if let Some(recv) = c.arguments.first() {
                if let CirValue::Variable(v) = g.value(*recv) {
                    normal_env = normal_env.extend(*v, Nullness::Initialized);
                }
            }
        }
        let result = if op.produces_initialized() {
            Nullness::Initialized
        } else {
            Nullness::Bottom
        };
        if let Some(k) = normal {
            dfa.visit_continuation(k, Some(result), &normal_env)?;
        }
        if let Some(k) = exception {
            dfa.visit_continuation(k, Some(Nullness::Bottom), env)?;
        }
        Ok(())
    }
}

/// Strip `NULL_POINTER` trap flags from operator calls whose receiver the
/// analysis proves initialized. Returns the number of checks removed.
pub fn remove_redundant_null_checks(g: &mut CirGraph, root: ValueId) -> Result<usize> {
    let domain = NullnessDomain;
    let results = {
        let mut dfa = Dfa::new(g, &domain);
        dfa.analyze(&mut NullnessSemantics, root, &Environment::empty())?;
        dfa.into_results()
    };

    let mut removed = 0;
    for call in reachable_calls(g, root) {
        let CirValue::Operator(op) = g.value(g.calls[call].procedure) else {
            continue;
        };
        if !op.requires_receiver() || !op.can_trap.contains(Traps::NULL_POINTER) {
            continue;
        }
        let receiver_known = results
            .get(&call)
            .and_then(|args| args.first())
            .is_some_and(|n| *n == Nullness::Initialized);
        if !receiver_known {
            continue;
        }
        // Operator values may be shared between calls, so rewrite this
        // call to a fresh node instead of mutating in place.
        let mut op = *op;
        op.can_trap.remove(Traps::NULL_POINTER);
        let unchecked = g.alloc_value(CirValue::Operator(op));
        let mut shape = g.calls[call].shape();
        shape.procedure = unchecked;
        g.assign_call(call, shape);
        removed += 1;
    }
    if removed > 0 {
        debug!(removed, "removed redundant null checks");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_cir::{ClassRef, FieldRef, JavaOpKind, ValueKind, VarRole};

    #[test]
    fn nullness_semilattice_laws() {
        crate::domain::tests::check_semilattice_laws(
            &NullnessDomain,
            &[
                Nullness::Top,
                Nullness::Null,
                Nullness::Initialized,
                Nullness::Bottom,
            ],
        );
    }

    /// λ(k, ke). new C (λo. getfield o (λv. k(v)) ke) ke
    /// The getfield's receiver comes straight from the allocation, so its
    /// null check must go away.
    #[test]
    fn allocation_feeds_checked_dereference() {
        let mut g = CirGraph::new();
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ke = g.new_var(ValueKind::Reference, VarRole::ExceptionContinuation);
        let ku = g.use_var(k);
        let keu = g.use_var(ke);

        let v = g.new_var(ValueKind::Int, VarRole::Local);
        let vu = g.use_var(v);
        let done = g.call(ku, vec![vu]);
        let after_load = g.continuation(Some(v), done);

        let o = g.new_var(ValueKind::Reference, VarRole::Local);
        let ou = g.use_var(o);
        let getfield = g.alloc_value(CirValue::Operator(JavaOp::new(JavaOpKind::GetField {
            field: FieldRef(3),
            kind: ValueKind::Int,
        })));
        let load = g.call(getfield, vec![ou, after_load, keu]);
        let after_new = g.continuation(Some(o), load);

        let new = g.alloc_value(CirValue::Operator(JavaOp::new(JavaOpKind::New {
            class: ClassRef(1),
        })));
        let alloc = g.call(new, vec![after_new, keu]);
        let root = g.closure(vec![k, ke], alloc);

        let removed = remove_redundant_null_checks(&mut g, root).unwrap();
        assert_eq!(removed, 1);
        let CirValue::Operator(op) = g.value(g.calls[load].procedure) else {
            panic!("getfield replaced");
        };
        assert!(!op.can_trap.contains(Traps::NULL_POINTER));
    }

    /// A receiver arriving as a closure parameter proves nothing; the check
    /// must stay.
    #[test]
    fn unknown_receiver_keeps_check() {
        let mut g = CirGraph::new();
        let recv = g.new_var(ValueKind::Reference, VarRole::Local);
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ke = g.new_var(ValueKind::Reference, VarRole::ExceptionContinuation);
        let ru = g.use_var(recv);
        let ku = g.use_var(k);
        let keu = g.use_var(ke);

        let getfield = g.alloc_value(CirValue::Operator(JavaOp::new(JavaOpKind::GetField {
            field: FieldRef(3),
            kind: ValueKind::Int,
        })));
        let load = g.call(getfield, vec![ru, ku, keu]);
        let root = g.closure(vec![recv, k, ke], load);

        let removed = remove_redundant_null_checks(&mut g, root).unwrap();
        assert_eq!(removed, 0);
        let CirValue::Operator(op) = g.value(g.calls[load].procedure) else {
            panic!("getfield replaced");
        };
        assert!(op.can_trap.contains(Traps::NULL_POINTER));
    }

    /// Dereferencing the same variable twice: the second check is subsumed
    /// by the first on the normal path.
    #[test]
    fn second_dereference_subsumed() {
        let mut g = CirGraph::new();
        let recv = g.new_var(ValueKind::Reference, VarRole::Local);
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ke = g.new_var(ValueKind::Reference, VarRole::ExceptionContinuation);
        let ru = g.use_var(recv);
        let ku = g.use_var(k);
        let keu = g.use_var(ke);

        let v2 = g.new_var(ValueKind::Int, VarRole::Local);
        let v2u = g.use_var(v2);
        let done = g.call(ku, vec![v2u]);
        let after2 = g.continuation(Some(v2), done);

        let gf2 = g.alloc_value(CirValue::Operator(JavaOp::new(JavaOpKind::GetField {
            field: FieldRef(4),
            kind: ValueKind::Int,
        })));
        let load2 = g.call(gf2, vec![ru, after2, keu]);
        let v1 = g.new_var(ValueKind::Int, VarRole::Local);
        let after1 = g.continuation(Some(v1), load2);

        let gf1 = g.alloc_value(CirValue::Operator(JavaOp::new(JavaOpKind::GetField {
            field: FieldRef(3),
            kind: ValueKind::Int,
        })));
        let load1 = g.call(gf1, vec![ru, after1, keu]);
        let root = g.closure(vec![recv, k, ke], load1);

        let removed = remove_redundant_null_checks(&mut g, root).unwrap();
        assert_eq!(removed, 1);
        let CirValue::Operator(op1) = g.value(g.calls[load1].procedure) else {
            panic!()
        };
        let CirValue::Operator(op2) = g.value(g.calls[load2].procedure) else {
            panic!()
        };
        assert!(op1.can_trap.contains(Traps::NULL_POINTER));
        assert!(!op2.can_trap.contains(Traps::NULL_POINTER));
    }
}
