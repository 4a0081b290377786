//! Worklist traversal, substitution and invariant checks over a CIR graph.
//!
//! Method bodies can be deeply nested and cyclic through shared blocks, so
//! nothing here recurses on the native stack: every walk is an explicit
//! worklist with a visited-block set.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, ensure};

use crate::{CallId, CirGraph, CirValue, ValueId, VarId, VarRole};

/// Every call reachable from `root`, visiting each block body once.
pub fn reachable_calls(g: &CirGraph, root: ValueId) -> Vec<CallId> {
    let mut out = Vec::new();
    let mut seen_blocks = BTreeSet::new();
    let mut seen_calls = BTreeSet::new();
    let mut values = vec![root];
    while let Some(v) = values.pop() {
        let body = match g.value(v) {
            CirValue::Closure(c) => Some(c.body),
            CirValue::Continuation(c) => Some(c.body),
            CirValue::Block(b) => {
                if seen_blocks.insert(*b) {
                    values.push(g.blocks[*b].closure);
                }
                None
            }
            _ => None,
        };
        let Some(call) = body else { continue };
        if !seen_calls.insert(call) {
            continue;
        }
        out.push(call);
        let c = &g.calls[call];
        values.push(c.procedure);
        values.extend(c.arguments.iter().copied());
        if let Some(frame) = &c.frame {
            values.extend(frame.slots().copied());
        }
    }
    out
}

/// All blocks reachable from `root`.
pub fn reachable_blocks(g: &CirGraph, root: ValueId) -> Vec<BlockSites> {
    let mut sites: BTreeMap<crate::BlockId, Vec<CallId>> = BTreeMap::new();
    for call in reachable_calls(g, root) {
        let c = &g.calls[call];
        if let CirValue::Block(b) = g.value(c.procedure) {
            sites.entry(*b).or_default().push(call);
        }
        // A block mentioned in argument or frame position is live even
        // without direct call sites.
        for slot in c.arguments.iter().chain(c.frame.iter().flat_map(|f| f.slots())) {
            if let CirValue::Block(b) = g.value(*slot) {
                sites.entry(*b).or_default();
            }
        }
    }
    sites
        .into_iter()
        .map(|(block, call_sites)| BlockSites { block, call_sites })
        .collect()
}

/// A reachable block together with its recomputed call sites.
pub struct BlockSites {
    pub block: crate::BlockId,
    pub call_sites: Vec<CallId>,
}

/// Recompute the call-site list of every block reachable from `root`,
/// discarding stale entries left behind by rewrites. Returns the reachable
/// blocks.
pub fn refresh_blocks(g: &mut CirGraph, root: ValueId) -> Vec<crate::BlockId> {
    let found = reachable_blocks(g, root);
    // A rewrite can strand a block entirely; its stale sites must go too,
    // so every list is cleared before the reachable ones are reinstalled.
    let all: Vec<_> = g.blocks.iter().map(|(id, _)| id).collect();
    for block in all {
        g.blocks[block].call_sites.clear();
    }
    for bs in &found {
        g.blocks[bs.block].call_sites = bs.call_sites.clone();
    }
    found.into_iter().map(|bs| bs.block).collect()
}

/// The free variables of the subgraph rooted at `root`: variables used but
/// whose binding closure lies outside the subgraph. Variables are
/// identity-unique, so this is simply uses minus binders.
pub fn free_variables(g: &CirGraph, root: ValueId) -> BTreeSet<VarId> {
    let mut used = BTreeSet::new();
    let mut bound = BTreeSet::new();
    let record = |g: &CirGraph, v: ValueId, used: &mut BTreeSet<VarId>| {
        if let CirValue::Variable(var) = g.value(v) {
            used.insert(*var);
        }
    };
    record(g, root, &mut used);
    let mut seen_blocks = BTreeSet::new();
    let mut values = vec![root];
    while let Some(v) = values.pop() {
        let body = match g.value(v) {
            CirValue::Closure(c) => {
                bound.extend(c.parameters.iter().copied());
                Some(c.body)
            }
            CirValue::Continuation(c) => {
                bound.extend(c.parameter);
                Some(c.body)
            }
            CirValue::Block(b) => {
                if seen_blocks.insert(*b) {
                    values.push(g.blocks[*b].closure);
                }
                None
            }
            _ => None,
        };
        let Some(call) = body else { continue };
        let c = &g.calls[call];
        for slot in std::iter::once(&c.procedure)
            .chain(c.arguments.iter())
            .chain(c.frame.iter().flat_map(|f| f.slots()))
        {
            record(g, *slot, &mut used);
            values.push(*slot);
        }
    }
    used.difference(&bound).copied().collect()
}

/// Number of textual uses of `var` in the subgraph rooted at `root`.
pub fn count_uses(g: &CirGraph, var: VarId, root: ValueId) -> usize {
    let mut n = 0;
    for call in reachable_calls(g, root) {
        let c = &g.calls[call];
        for slot in std::iter::once(&c.procedure)
            .chain(c.arguments.iter())
            .chain(c.frame.iter().flat_map(|f| f.slots()))
        {
            if g.as_variable(*slot) == Some(var) {
                n += 1;
            }
        }
    }
    n
}

/// A variable-to-value substitution, applied destructively to every use in a
/// subgraph (beta-reduction substrate). Chained substitutions pierce: if the
/// replacement is itself a substituted variable, the final value wins.
#[derive(Default, Debug)]
pub struct Substitution {
    map: BTreeMap<VarId, ValueId>,
}

impl Substitution {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn bind(&mut self, var: VarId, value: ValueId) {
        self.map.insert(var, value);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look through the substitution chain for one slot value.
    pub fn resolve(&self, g: &CirGraph, mut v: ValueId) -> ValueId {
        while let Some(next) = g.as_variable(v).and_then(|var| self.map.get(&var)) {
            if *next == v {
                break;
            }
            v = *next;
        }
        v
    }

    /// Rewrite the slots of one call in place: procedure (keeping block
    /// call-site lists consistent), arguments, and frame descriptor.
    pub fn apply_call(&self, g: &mut CirGraph, call: CallId) {
        let old_procedure = g.calls[call].procedure;
        let new_procedure = self.resolve(g, old_procedure);
        if new_procedure != old_procedure {
            let mut shape = g.calls[call].shape();
            shape.procedure = new_procedure;
            g.assign_call(call, shape);
        }
        for i in 0..g.calls[call].arguments.len() {
            let a = g.calls[call].arguments[i];
            g.calls[call].arguments[i] = self.resolve(g, a);
        }
        if g.calls[call].frame.is_some() {
            let slots: Vec<ValueId> = g.calls[call]
                .frame
                .as_ref()
                .into_iter()
                .flat_map(|f| f.slots().copied())
                .collect();
            let resolved: Vec<ValueId> = slots.iter().map(|s| self.resolve(g, *s)).collect();
            let mut it = resolved.into_iter();
            for slot in g.calls[call].frame.as_mut().into_iter().flat_map(|f| f.slots_mut()) {
                *slot = it.next().unwrap_or(*slot);
            }
        }
    }

    /// Rewrite every use in the subgraph under `root_call`, including frame
    /// descriptor slots, keeping block call-site lists consistent when a
    /// call's procedure changes.
    pub fn apply(&self, g: &mut CirGraph, root_call: CallId) {
        if self.map.is_empty() {
            return;
        }
        let mut seen_blocks = BTreeSet::new();
        let mut calls = vec![root_call];
        while let Some(call) = calls.pop() {
            self.apply_call(g, call);
            // Descend into literal closures and blocks referenced here.
            let c = &g.calls[call];
            let mut next_values: Vec<ValueId> = Vec::with_capacity(1 + c.arguments.len());
            next_values.push(c.procedure);
            next_values.extend(c.arguments.iter().copied());
            for v in next_values {
                match g.value(v) {
                    CirValue::Closure(cl) => calls.push(cl.body),
                    CirValue::Continuation(k) => calls.push(k.body),
                    CirValue::Block(b) => {
                        if seen_blocks.insert(*b) {
                            if let Some(cl) = g.block_closure(*b) {
                                calls.push(cl.body);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// A closure is a trivial wrapper when its body forwards exactly its own
/// parameters, in order, to some other procedure. Returns the wrapped
/// procedure.
pub fn trivial_wrapper_target(g: &CirGraph, value: ValueId) -> Option<ValueId> {
    let closure = g.as_closure(value)?;
    let body = &g.calls[closure.body];
    if body.arguments.len() != closure.parameters.len() {
        return None;
    }
    for (arg, param) in body.arguments.iter().zip(closure.parameters.iter()) {
        if g.as_variable(*arg) != Some(*param) {
            return None;
        }
    }
    // Forwarding to one of the closure's own parameters is not collapsible.
    if let Some(v) = g.as_variable(body.procedure) {
        if closure.parameters.contains(&v) {
            return None;
        }
    }
    Some(body.procedure)
}

/// Check the structural invariants every rewrite must preserve: call arity
/// matches the target's parameter count, and no closure binds more than one
/// continuation parameter per role. Violations are internal-consistency
/// bugs, fatal to this compilation.
pub fn verify_arities(g: &CirGraph, root: ValueId) -> anyhow::Result<()> {
    for call in reachable_calls(g, root) {
        let c = &g.calls[call];
        let nargs = c.arguments.len();
        match g.value(c.procedure) {
            CirValue::Closure(cl) => {
                ensure!(
                    cl.parameters.len() == nargs,
                    "closure of {} parameters called with {} arguments",
                    cl.parameters.len(),
                    nargs
                );
                check_continuation_roles(g, &cl.parameters)?;
            }
            CirValue::Block(b) => {
                let Some(cl) = g.block_closure(*b) else {
                    bail!("block wraps a non-closure value");
                };
                ensure!(
                    cl.parameters.len() == nargs,
                    "block of {} parameters called with {} arguments",
                    cl.parameters.len(),
                    nargs
                );
                check_continuation_roles(g, &cl.parameters)?;
            }
            CirValue::Continuation(k) => {
                let want = k.parameter.is_some() as usize;
                ensure!(
                    nargs == want,
                    "continuation of {want} parameters called with {nargs} arguments"
                );
            }
            CirValue::Builtin(b) => {
                ensure!(
                    b.arity() == nargs,
                    "builtin {:?} of arity {} called with {} arguments",
                    b.op,
                    b.arity(),
                    nargs
                );
            }
            CirValue::Switch(s) => {
                ensure!(
                    s.arity() == nargs,
                    "switch of arity {} called with {} arguments",
                    s.arity(),
                    nargs
                );
            }
            CirValue::Constant(_) => bail!("constant in procedure position"),
            // Variables, methods, operators and undefined carry no local
            // arity information.
            _ => {}
        }
    }
    Ok(())
}

fn check_continuation_roles(g: &CirGraph, parameters: &[VarId]) -> anyhow::Result<()> {
    let normal = parameters
        .iter()
        .filter(|p| g.vars[**p].role == VarRole::NormalContinuation)
        .count();
    let exceptional = parameters
        .iter()
        .filter(|p| g.vars[**p].role == VarRole::ExceptionContinuation)
        .count();
    ensure!(
        normal <= 1 && exceptional <= 1,
        "closure binds {normal} normal and {exceptional} exception continuation parameters"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockRole, CallShape, ConstValue, ValueKind};

    fn ret_graph() -> (CirGraph, ValueId, VarId) {
        // λ(x, k). k(x)
        let mut g = CirGraph::new();
        let x = g.new_var(ValueKind::Int, VarRole::Local);
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ku = g.use_var(k);
        let xu = g.use_var(x);
        let body = g.call(ku, vec![xu]);
        let root = g.closure(vec![x, k], body);
        (g, root, x)
    }

    #[test]
    fn reachable_visits_blocks_once() {
        let mut g = CirGraph::new();
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ku = g.use_var(k);
        let one = g.constant(ConstValue::Int(1));
        let exit = g.call(ku, vec![one]);
        let inner = g.closure(vec![], exit);
        let (_b, bv) = g.block(BlockRole::Normal, inner);
        // Two calls targeting the same block.
        let c1 = g.call(bv, vec![]);
        let outer = g.closure(vec![k], c1);
        let calls = reachable_calls(&g, outer);
        assert_eq!(calls.len(), 2);
        assert!(calls.contains(&c1));
        assert!(calls.contains(&exit));
    }

    #[test]
    fn free_variables_exclude_bound() {
        let (g, root, _) = ret_graph();
        assert!(free_variables(&g, root).is_empty());

        // A continuation referencing an outside variable is not closed.
        let mut g = CirGraph::new();
        let outer = g.new_var(ValueKind::Int, VarRole::Local);
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ku = g.use_var(k);
        let ou = g.use_var(outer);
        let body = g.call(ku, vec![ou]);
        let cont = g.continuation(None, body);
        let free = free_variables(&g, cont);
        assert_eq!(free, [outer, k].into_iter().collect());
    }

    #[test]
    fn substitution_rewrites_uses_and_frames() {
        let (mut g, root, x) = ret_graph();
        let seven = g.constant(ConstValue::Int(7));
        let body = g.as_closure(root).unwrap().body;
        let xu = g.use_var(x);
        g.calls[body].frame = Some(crate::FrameDescriptor {
            locals: vec![xu],
            stack: vec![],
        });

        let mut s = Substitution::new();
        s.bind(x, seven);
        s.apply(&mut g, body);

        assert_eq!(g.calls[body].arguments, vec![seven]);
        assert_eq!(g.calls[body].frame.as_ref().unwrap().locals, vec![seven]);
        assert_eq!(count_uses(&g, x, root), 0);
    }

    #[test]
    fn substitution_retargets_block_calls() {
        let mut g = CirGraph::new();
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ku = g.use_var(k);
        let one = g.constant(ConstValue::Int(1));
        let exit = g.call(ku, vec![one]);
        let inner = g.closure(vec![], exit);
        let (b, bv) = g.block(BlockRole::Normal, inner);

        // p() where p := block
        let p = g.new_var(ValueKind::Reference, VarRole::Local);
        let pu = g.use_var(p);
        let site = g.call(pu, vec![]);
        let mut s = Substitution::new();
        s.bind(p, bv);
        s.apply(&mut g, site);

        assert_eq!(g.calls[site].procedure, bv);
        assert_eq!(g.blocks[b].call_sites, vec![site]);
    }

    #[test]
    fn wrapper_detection() {
        let mut g = CirGraph::new();
        let f = g.new_var(ValueKind::Reference, VarRole::Local);
        let fu = g.use_var(f);
        let a = g.new_var(ValueKind::Int, VarRole::Local);
        let au = g.use_var(a);
        let body = g.call(fu, vec![au]);
        let wrapper = g.closure(vec![a], body);
        assert_eq!(trivial_wrapper_target(&g, wrapper), Some(fu));

        // Forwarding to its own parameter is not a wrapper.
        let p = g.new_var(ValueKind::Reference, VarRole::Local);
        let pu = g.use_var(p);
        let body2 = g.call(pu, vec![pu]);
        let selfcall = g.closure(vec![p], body2);
        assert_eq!(trivial_wrapper_target(&g, selfcall), None);
    }

    #[test]
    fn arity_verification_rejects_mismatch() {
        let (mut g, root, _) = ret_graph();
        assert!(verify_arities(&g, root).is_ok());
        let extra = g.constant(ConstValue::Int(0));
        // Sabotage: call the root closure with one argument too few.
        let rootcall = g.call(root, vec![extra]);
        let top = g.closure(vec![], rootcall);
        assert!(verify_arities(&g, top).is_err());
    }

    #[test]
    fn refresh_drops_stale_sites() {
        let mut g = CirGraph::new();
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ku = g.use_var(k);
        let one = g.constant(ConstValue::Int(1));
        let exit = g.call(ku, vec![one]);
        let inner = g.closure(vec![], exit);
        let (b, bv) = g.block(BlockRole::Normal, inner);
        let site = g.call(bv, vec![]);
        let root = g.closure(vec![k], site);

        // Bypass assign_call to simulate a stale list.
        g.calls[site].procedure = ku;
        g.calls[site].arguments = vec![one];
        assert_eq!(g.blocks[b].call_sites, vec![site]);
        refresh_blocks(&mut g, root);
        assert!(g.blocks[b].call_sites.is_empty());
    }

    #[test]
    fn use_counting_includes_procedure_position() {
        let (g, root, x) = ret_graph();
        assert_eq!(count_uses(&g, x, root), 1);
        let k = g
            .vars
            .iter()
            .find(|(_, v)| v.role == VarRole::NormalContinuation)
            .map(|(id, _)| id)
            .unwrap();
        assert_eq!(count_uses(&g, k, root), 1);
    }
}
