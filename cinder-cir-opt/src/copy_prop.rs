//! Copy propagation over literal closure calls.
//!
//! A call of a literal closure whose argument is a variable or a constant
//! does not need the parameter: the argument is substituted for it and the
//! pair dropped. Continuation-role parameters are exempt; they are only
//! tracked for arity. When every pair of a call drops, the call collapses
//! into the (substituted) closure body. A committed substitution applies to
//! every later use the traversal encounters, frame descriptors included.

use std::collections::{BTreeSet, VecDeque};

use anyhow::{Context, Result, ensure};
use cinder_cir::walk::Substitution;
use cinder_cir::{CirGraph, CirValue, ValueId, VarId};
use tracing::debug;

/// Run copy propagation over the closure at `root`. Returns the number of
/// parameter/argument pairs eliminated.
pub fn propagate_copies(g: &mut CirGraph, root: ValueId) -> Result<usize> {
    let body = g
        .as_closure(root)
        .context("copy propagation root is not a closure")?
        .body;
    let mut s = Substitution::new();
    let mut dropped = 0;
    let mut seen_blocks = BTreeSet::new();
    let mut seen_calls = BTreeSet::new();
    let mut worklist = VecDeque::from([body]);
    while let Some(call) = worklist.pop_front() {
        if !seen_calls.insert(call) {
            continue;
        }
        // Collapsing can re-expose another closure literal at the same
        // call; keep rewriting this call until it settles.
        loop {
            s.apply_call(g, call);
            let procedure = g.calls[call].procedure;
            let CirValue::Closure(cl) = g.value(procedure) else {
                break;
            };
            let parameters = cl.parameters.clone();
            let body = cl.body;
            let arguments = g.calls[call].arguments.clone();
            ensure!(
                parameters.len() == arguments.len(),
                "closure of {} parameters called with {} arguments",
                parameters.len(),
                arguments.len()
            );
            let mut kept_params: Vec<VarId> = Vec::new();
            let mut kept_args: Vec<ValueId> = Vec::new();
            for (&p, &a) in parameters.iter().zip(arguments.iter()) {
                let copyable = !g.vars[p].role.is_continuation()
                    && matches!(g.value(a), CirValue::Variable(_) | CirValue::Constant(_));
                if copyable {
                    s.bind(p, a);
                    dropped += 1;
                } else {
                    kept_params.push(p);
                    kept_args.push(a);
                }
            }
            if kept_params.len() == parameters.len() {
                break;
            }
            if kept_params.is_empty() {
                g.splice_body(call, body);
                continue;
            }
            if let CirValue::Closure(cl) = g.value_mut(procedure) {
                cl.parameters = kept_params;
            }
            let mut shape = g.calls[call].shape();
            shape.arguments = kept_args;
            g.assign_call(call, shape);
            break;
        }
        // Descend into whatever the call now references.
        let c = &g.calls[call];
        let mut slots: Vec<ValueId> = Vec::with_capacity(1 + c.arguments.len());
        slots.push(c.procedure);
        slots.extend(c.arguments.iter().copied());
        for v in slots {
            match g.value(v) {
                CirValue::Closure(cl) => worklist.push_back(cl.body),
                CirValue::Continuation(k) => worklist.push_back(k.body),
                CirValue::Block(b) => {
                    if seen_blocks.insert(*b) {
                        if let Some(cl) = g.block_closure(*b) {
                            worklist.push_back(cl.body);
                        }
                    }
                }
                _ => {}
            }
        }
    }
    if dropped > 0 {
        debug!(dropped, "copy propagation eliminated parameter pairs");
    }
    Ok(dropped)
}
