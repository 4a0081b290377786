//! Constant block-argument propagation.
//!
//! A block parameter that is bound to the same value at every call site can
//! often be eliminated: the value moves into the block body and the
//! position disappears from the parameter list and from every site. What
//! qualifies depends on the value and on how the parameter is used:
//!
//! - any identical value feeding an unused parameter: dropped outright;
//! - an identical (by value) constant: substituted regardless of use count,
//!   a constant costs nothing to replicate;
//! - the identical continuation node, used once: moved into the body. Its
//!   free variables must stay reachable, so each one either aliases an
//!   existing parameter position that every site feeds with that same
//!   variable, or becomes a fresh trailing parameter fed by every site.
//!   If appending would give the block a second continuation parameter of
//!   the same role, the position is left alone.
//!
//! Positions are scanned without advancing the index after a removal, since
//! removal shifts the positions behind it.

use std::collections::BTreeSet;

use anyhow::{Context, Result, ensure};
use cinder_cir::walk::{Substitution, count_uses, free_variables, reachable_blocks};
use cinder_cir::{BlockId, CallId, CirGraph, CirValue, ValueId, VarId, VarRole};
use tracing::debug;

use crate::{TransformKind, TransformObserver};

/// Run the pass over every block reachable from `root`. Returns the number
/// of argument positions eliminated. Call-site lists must be current
/// (`refresh_blocks`) before this runs.
pub fn propagate_block_arguments(
    g: &mut CirGraph,
    observer: &mut dyn TransformObserver,
    root: ValueId,
) -> Result<usize> {
    let mut eliminated = 0;
    for bs in reachable_blocks(g, root) {
        if bs.call_sites.is_empty() {
            continue;
        }
        eliminated += propagate_for_block(g, observer, bs.block, &bs.call_sites)?;
    }
    if eliminated > 0 {
        debug!(eliminated, "block argument positions eliminated");
    }
    Ok(eliminated)
}

fn propagate_for_block(
    g: &mut CirGraph,
    observer: &mut dyn TransformObserver,
    block: BlockId,
    sites: &[CallId],
) -> Result<usize> {
    let closure_value = g.blocks[block].closure;
    let mut eliminated = 0;
    let mut i = 0;
    loop {
        let parameters = g
            .block_closure(block)
            .context("block wraps a non-closure value")?
            .parameters
            .clone();
        if i >= parameters.len() {
            break;
        }
        for &s in sites {
            ensure!(
                g.calls[s].arguments.len() == parameters.len(),
                "block of {} parameters called with {} arguments",
                parameters.len(),
                g.calls[s].arguments.len()
            );
        }
        let param = parameters[i];
        let reference = g.calls[sites[0]].arguments[i];
        let identical = sites
            .iter()
            .all(|&s| g.same_argument(g.calls[s].arguments[i], reference));
        if !identical {
            i += 1;
            continue;
        }
        let uses = count_uses(g, param, closure_value);
        let removed = if uses == 0 {
            observer.notify_before(TransformKind::ConstantBlockArguments, sites[0]);
            drop_position(g, block, sites, i);
            observer.notify_after(TransformKind::ConstantBlockArguments, sites[0]);
            true
        } else {
            match g.value(reference) {
                CirValue::Constant(_) => {
                    observer.notify_before(TransformKind::ConstantBlockArguments, sites[0]);
                    let mut s = Substitution::new();
                    s.bind(param, reference);
                    let body = g.block_closure(block).map(|cl| cl.body);
                    if let Some(body) = body {
                        s.apply(g, body);
                    }
                    drop_position(g, block, sites, i);
                    observer.notify_after(TransformKind::ConstantBlockArguments, sites[0]);
                    true
                }
                CirValue::Continuation(_) if uses == 1 => {
                    propagate_continuation(g, observer, block, sites, i, param, reference)?
                }
                _ => false,
            }
        };
        if removed {
            eliminated += 1;
        } else {
            i += 1;
        }
    }
    Ok(eliminated)
}

/// Remove parameter position `i` from the block and the matching argument
/// from every call site.
fn drop_position(g: &mut CirGraph, block: BlockId, sites: &[CallId], i: usize) {
    let closure_value = g.blocks[block].closure;
    if let CirValue::Closure(cl) = g.value_mut(closure_value) {
        cl.parameters.remove(i);
    }
    for &s in sites {
        g.calls[s].arguments.remove(i);
    }
}

/// Move the continuation at position `i` into the block body, rebinding its
/// free variables to parameters of the block. Returns false when the
/// continuation-role invariant would be violated.
fn propagate_continuation(
    g: &mut CirGraph,
    observer: &mut dyn TransformObserver,
    block: BlockId,
    sites: &[CallId],
    i: usize,
    param: VarId,
    cont: ValueId,
) -> Result<bool> {
    let closure_value = g.blocks[block].closure;
    let closure = g
        .block_closure(block)
        .context("block wraps a non-closure value")?;
    let parameters = closure.parameters.clone();
    let body = closure.body;

    let free: BTreeSet<VarId> = free_variables(g, cont)
        .into_iter()
        .filter(|v| !parameters.contains(v))
        .collect();
    let mut s = Substitution::new();
    s.bind(param, cont);
    let mut appends: Vec<VarId> = Vec::new();
    for &v in &free {
        let alias = (0..parameters.len()).find(|&j| {
            j != i
                && sites
                    .iter()
                    .all(|&site| g.as_variable(g.calls[site].arguments[j]) == Some(v))
        });
        match alias {
            Some(j) => {
                let use_of = g.use_var(parameters[j]);
                s.bind(v, use_of);
            }
            None => appends.push(v),
        }
    }

    // The block may end up with at most one continuation parameter per
    // role; abandon the position rather than break that.
    for role in [VarRole::NormalContinuation, VarRole::ExceptionContinuation] {
        let existing = parameters
            .iter()
            .enumerate()
            .filter(|&(j, p)| j != i && g.vars[*p].role == role)
            .count();
        let added = appends.iter().filter(|v| g.vars[**v].role == role).count();
        if existing + added > 1 {
            return Ok(false);
        }
    }

    let mut new_params: Vec<VarId> = Vec::with_capacity(appends.len());
    for &v in &appends {
        let fresh = g.new_var(g.vars[v].kind, g.vars[v].role);
        let use_of = g.use_var(fresh);
        s.bind(v, use_of);
        new_params.push(fresh);
    }

    observer.notify_before(TransformKind::ConstantBlockArguments, sites[0]);
    drop_position(g, block, sites, i);
    if let CirValue::Closure(cl) = g.value_mut(closure_value) {
        cl.parameters.extend(new_params);
    }
    for &v in &appends {
        let use_of = g.use_var(v);
        for &site in sites {
            g.calls[site].arguments.push(use_of);
        }
    }
    s.apply(g, body);
    observer.notify_after(TransformKind::ConstantBlockArguments, sites[0]);
    Ok(true)
}
