//! Generic forward dataflow over a CIR graph.
//!
//! The engine walks a closure's body, propagating abstract values from a
//! [`ValueDomain`] through parameter bindings, shared blocks and discovered
//! continuation aliases, to a fixed point. The recorded output is, per call,
//! the per-argument abstract values merged (via `meet`) over every way the
//! call is reached.
//!
//! Operator and switch calls are delegated to an [`OperatorSemantics`] hook
//! so a concrete analysis can inject operation-specific facts; the default
//! conservatively visits every continuation operand with `bottom`.
//!
//! Termination: per-block parameter values and per-call results only move
//! downward under `meet`, and the domains used here have finite height, so
//! both worklists drain in finitely many steps.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::{Context, bail};
use cinder_cir::{
    BlockId, CallId, CirGraph, CirSwitch, CirValue, JavaOp, ValueId, VarId,
};
use tracing::trace;

use crate::domain::ValueDomain;
use crate::env::Environment;

pub type DfaResults<D> = BTreeMap<CallId, Vec<<D as ValueDomain>::Elem>>;

/// Hook for operation-specific transfer functions.
pub trait OperatorSemantics<D: ValueDomain> {
    fn analyze_operator_call(
        &mut self,
        dfa: &mut Dfa<'_, D>,
        call: CallId,
        op: &JavaOp,
        args: &[D::Elem],
        env: &Environment<D::Elem>,
    ) -> anyhow::Result<()> {
        let _ = (op, args);
        dfa.visit_all_continuations(call, env)
    }

    fn analyze_switch_call(
        &mut self,
        dfa: &mut Dfa<'_, D>,
        call: CallId,
        switch: &CirSwitch,
        args: &[D::Elem],
        env: &Environment<D::Elem>,
    ) -> anyhow::Result<()> {
        let _ = (switch, args);
        dfa.visit_all_continuations(call, env)
    }
}

/// The conservative hook: no operation-specific knowledge.
pub struct DefaultSemantics;

impl<D: ValueDomain> OperatorSemantics<D> for DefaultSemantics {}

pub struct Dfa<'g, D: ValueDomain> {
    graph: &'g CirGraph,
    domain: &'g D,
    call_worklist: VecDeque<(CallId, Environment<D::Elem>)>,
    block_values: BTreeMap<BlockId, Vec<D::Elem>>,
    block_worklist: VecDeque<BlockId>,
    queued_blocks: BTreeSet<BlockId>,
    /// Continuation aliasing: which concrete continuations may flow to each
    /// continuation-valued variable.
    cont_bindings: BTreeMap<VarId, BTreeSet<ValueId>>,
    results: DfaResults<D>,
}

impl<'g, D: ValueDomain> Dfa<'g, D> {
    pub fn new(graph: &'g CirGraph, domain: &'g D) -> Self {
        Dfa {
            graph,
            domain,
            call_worklist: VecDeque::new(),
            block_values: BTreeMap::new(),
            block_worklist: VecDeque::new(),
            queued_blocks: BTreeSet::new(),
            cont_bindings: BTreeMap::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn graph(&self) -> &'g CirGraph {
        self.graph
    }

    pub fn domain(&self) -> &'g D {
        self.domain
    }

    pub fn results(&self) -> &DfaResults<D> {
        &self.results
    }

    pub fn into_results(self) -> DfaResults<D> {
        self.results
    }

    /// The discovered continuation aliases of `var`.
    pub fn continuation_aliases(&self, var: VarId) -> impl Iterator<Item = ValueId> + '_ {
        self.cont_bindings.get(&var).into_iter().flatten().copied()
    }

    /// Run the analysis of the closure at `root` to a fixed point. Unbound
    /// parameters are seeded `bottom`: conservatively reachable from
    /// anywhere.
    pub fn analyze(
        &mut self,
        semantics: &mut impl OperatorSemantics<D>,
        root: ValueId,
        seed: &Environment<D::Elem>,
    ) -> anyhow::Result<()> {
        let closure = self
            .graph
            .as_closure(root)
            .context("dataflow root is not a closure")?;
        let mut env = seed.clone();
        for p in &closure.parameters {
            if env.lookup(*p).is_none() {
                env = env.extend(*p, self.domain.bottom());
            }
        }
        self.call_worklist.push_back((closure.body, env));
        loop {
            while let Some((call, env)) = self.call_worklist.pop_front() {
                self.analyze_call(semantics, call, &env)?;
            }
            let Some(block) = self.block_worklist.pop_front() else {
                break;
            };
            self.queued_blocks.remove(&block);
            let closure = self
                .graph
                .block_closure(block)
                .context("block wraps a non-closure value")?;
            let values = self.block_values.get(&block).cloned().unwrap_or_default();
            let env = Environment::empty()
                .extend_all(closure.parameters.iter().copied().zip(values));
            self.call_worklist.push_back((closure.body, env));
        }
        Ok(())
    }

    /// The abstract value of one operand under `env`.
    pub fn value_elem(&self, value: ValueId, env: &Environment<D::Elem>) -> D::Elem {
        match self.graph.value(value) {
            CirValue::Constant(c) => self.domain.from_constant(c),
            CirValue::Variable(v) => env
                .lookup(*v)
                .cloned()
                .unwrap_or_else(|| self.domain.bottom()),
            _ => self.domain.bottom(),
        }
    }

    fn analyze_call(
        &mut self,
        semantics: &mut impl OperatorSemantics<D>,
        call: CallId,
        env: &Environment<D::Elem>,
    ) -> anyhow::Result<()> {
        let c = &self.graph.calls[call];
        let args: Vec<D::Elem> = c
            .arguments
            .iter()
            .map(|a| self.value_elem(*a, env))
            .collect();
        self.record(call, &args)?;

        match self.graph.value(c.procedure) {
            CirValue::Block(b) => {
                let block = *b;
                let closure = self
                    .graph
                    .block_closure(block)
                    .context("block wraps a non-closure value")?;
                if closure.parameters.len() != args.len() {
                    bail!("block arity mismatch during analysis");
                }
                for (param, arg) in closure.parameters.iter().zip(c.arguments.iter()) {
                    self.note_continuation_flow(*param, *arg);
                }
                let changed = match self.block_values.get_mut(&block) {
                    None => {
                        self.block_values.insert(block, args);
                        true
                    }
                    Some(merged) => {
                        let mut changed = false;
                        for (m, a) in merged.iter_mut().zip(args.iter()) {
                            let met = self.domain.meet(m, a);
                            if !self.domain.equal(&met, m) {
                                *m = met;
                                changed = true;
                            }
                        }
                        changed
                    }
                };
                if changed && self.queued_blocks.insert(block) {
                    trace!(block = block.index(), "block parameters widened, requeued");
                    self.block_worklist.push_back(block);
                }
            }
            CirValue::Closure(closure) => {
                if closure.parameters.len() != args.len() {
                    bail!("closure arity mismatch during analysis");
                }
                for (param, arg) in closure.parameters.iter().zip(c.arguments.iter()) {
                    self.note_continuation_flow(*param, *arg);
                }
                let body = closure.body;
                let env = env.extend_all(closure.parameters.iter().copied().zip(args));
                self.call_worklist.push_back((body, env));
            }
            CirValue::Continuation(k) => {
                let body = k.body;
                let env = match (k.parameter, args.first()) {
                    (Some(p), Some(a)) => env.extend(p, a.clone()),
                    (None, None) => env.clone(),
                    _ => bail!("continuation arity mismatch during analysis"),
                };
                self.call_worklist.push_back((body, env));
            }
            CirValue::Variable(v) => {
                let var = *v;
                if !self.graph.vars[var].role.is_continuation() {
                    bail!("call through a non-continuation variable");
                }
                let targets: Vec<ValueId> = self.continuation_aliases(var).collect();
                for target in targets {
                    self.visit_continuation(target, args.first().cloned(), env)?;
                }
            }
            CirValue::Operator(op) => {
                let op = *op;
                semantics.analyze_operator_call(self, call, &op, &args, env)?;
            }
            CirValue::Switch(s) => {
                let s = *s;
                semantics.analyze_switch_call(self, call, &s, &args, env)?;
            }
            // Builtins and opaque methods get the conservative treatment:
            // every continuation operand is reachable with nothing known.
            CirValue::Builtin(_) | CirValue::Method(_) => {
                self.visit_all_continuations(call, env)?;
            }
            CirValue::Undefined => {}
            CirValue::Constant(_) => bail!("constant in procedure position"),
        }
        Ok(())
    }

    fn record(&mut self, call: CallId, args: &[D::Elem]) -> anyhow::Result<()> {
        match self.results.get_mut(&call) {
            None => {
                self.results.insert(call, args.to_vec());
            }
            Some(merged) => {
                if merged.len() != args.len() {
                    bail!("call argument count changed during analysis");
                }
                for (m, a) in merged.iter_mut().zip(args.iter()) {
                    *m = self.domain.meet(m, a);
                }
            }
        }
        Ok(())
    }

    fn note_continuation_flow(&mut self, param: VarId, arg: ValueId) {
        if !self.graph.vars[param].role.is_continuation() {
            return;
        }
        match self.graph.value(arg) {
            CirValue::Continuation(_) => {
                self.cont_bindings.entry(param).or_default().insert(arg);
            }
            CirValue::Variable(v) => {
                let flowed = self.cont_bindings.get(v).cloned().unwrap_or_default();
                self.cont_bindings.entry(param).or_default().extend(flowed);
            }
            _ => {}
        }
    }

    /// Propagate a (possibly absent) result value into a continuation
    /// operand, queueing its body for analysis.
    pub fn visit_continuation(
        &mut self,
        cont: ValueId,
        result: Option<D::Elem>,
        env: &Environment<D::Elem>,
    ) -> anyhow::Result<()> {
        match self.graph.value(cont) {
            CirValue::Continuation(k) => {
                let env = match k.parameter {
                    Some(p) => env.extend(p, result.unwrap_or_else(|| self.domain.bottom())),
                    None => env.clone(),
                };
                self.call_worklist.push_back((k.body, env));
                Ok(())
            }
            CirValue::Variable(v) => {
                let targets: Vec<ValueId> = self.continuation_aliases(*v).collect();
                for target in targets {
                    self.visit_continuation(target, result.clone(), env)?;
                }
                Ok(())
            }
            CirValue::Undefined => Ok(()),
            other => bail!("unexpected continuation operand: {other:?}"),
        }
    }

    /// The conservative transfer: every continuation operand of `call` is
    /// reachable, carrying `bottom`.
    pub fn visit_all_continuations(
        &mut self,
        call: CallId,
        env: &Environment<D::Elem>,
    ) -> anyhow::Result<()> {
        let args = self.graph.calls[call].arguments.clone();
        for arg in args {
            let is_cont = match self.graph.value(arg) {
                CirValue::Continuation(_) | CirValue::Undefined => true,
                CirValue::Variable(v) => self.graph.vars[*v].role.is_continuation(),
                _ => false,
            };
            if is_cont {
                self.visit_continuation(arg, Some(self.domain.bottom()), env)?;
            }
        }
        Ok(())
    }
}
