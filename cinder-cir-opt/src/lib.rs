//! Optimization of CIR graphs: analyses and rewriting passes that shrink a
//! method's [`cinder_cir`] graph into an equivalent, more reduced form
//! before lowering.
//!
//! Everything operates on one graph at a time, single-threaded, mutating
//! nodes in place. External services (meta-evaluation, method/block
//! predicates, the inlining transformation, trace observation) are passed
//! in as collaborator traits, never reached through globals.
//!
//! # Key Types
//!
//! * [`CirOptimizer`] - the driver: deflation, block bookkeeping, constant
//!   block-argument propagation and inlining, interleaved to a fixed point.
//! * [`OptCx`] - the collaborator bundle handed to rewriting passes.
//! * [`TransformObserver`] / [`TransformKind`] - before/after transformation
//!   notifications for external diagnostics.
//!
//! # Modules
//!
//! * [`domain`] - the meet-semilattice abstraction dataflow runs over.
//! * [`env`] - persistent variable-to-abstract-value environments.
//! * [`dfa`] - the generic fixed-point dataflow engine.
//! * [`initialized`] - nullness analysis and null-check removal.
//! * [`foldable`] - compile-time evaluation of constant-operand calls.
//! * [`reduce`] - builtin strength reduction.
//! * [`deflation`] - the local simplification loop and builtin variants.
//! * [`copy_prop`] - parameter/argument pair elimination.
//! * [`block_args`] - constant block-argument propagation.
//! * [`inline`] - inlining policy and the external inlining seam.

pub mod block_args;
pub mod copy_prop;
pub mod deflation;
pub mod dfa;
pub mod domain;
pub mod env;
pub mod foldable;
pub mod initialized;
pub mod inline;
pub mod reduce;

use anyhow::{Context, Result};
use cinder_cir::walk::{refresh_blocks, verify_arities};
use cinder_cir::{CallId, CirGraph, ValueId};
use tracing::debug;

use crate::foldable::MetaEvaluate;
use crate::inline::{CirOracle, Inlining, InliningPolicy};

/// The named transformations reported to the observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformKind {
    Deflation,
    Folding,
    Reducing,
    BetaReduction,
    BuiltinVariant,
    ConstantBlockArguments,
    Inlining,
}

/// Diagnostics sink notified around each transformation. A passed-in
/// capability, not a process-wide hook, so the passes are testable without
/// a live diagnostics subsystem. Has no effect on optimization outcome.
pub trait TransformObserver {
    fn notify_before(&mut self, _kind: TransformKind, _call: CallId) {}
    fn notify_after(&mut self, _kind: TransformKind, _call: CallId) {}
}

/// The observer that ignores everything.
pub struct NullObserver;

impl TransformObserver for NullObserver {}

/// Collaborators threaded through the rewriting passes.
pub struct OptCx<'a> {
    pub evaluator: &'a mut dyn MetaEvaluate,
    pub observer: &'a mut dyn TransformObserver,
}

/// The optimizer driver for one method's graph.
///
/// The loop ordering is load-bearing: deflation runs before block
/// bookkeeping so the bookkeeping never sees stale references, and constant
/// block-argument propagation restarts the loop eagerly because it can
/// unlock further deflation that is cheaper than a round of inlining.
pub struct CirOptimizer<'a> {
    pub graph: &'a mut CirGraph,
    /// The closure being compiled.
    pub root: ValueId,
    pub evaluator: &'a mut dyn MetaEvaluate,
    pub observer: &'a mut dyn TransformObserver,
    pub oracle: &'a dyn CirOracle,
    pub policy: &'a dyn InliningPolicy,
    pub inliner: &'a mut dyn Inlining,
}

impl CirOptimizer<'_> {
    /// Optimize to a global fixed point. Returns whether anything changed.
    pub fn optimize(&mut self) -> Result<bool> {
        let body = self
            .graph
            .as_closure(self.root)
            .context("optimizer root is not a closure")?
            .body;
        let mut changed = false;
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let deflations = {
                let mut cx = OptCx {
                    evaluator: &mut *self.evaluator,
                    observer: &mut *self.observer,
                };
                deflation::deflate(self.graph, &mut cx, self.root)?
            };
            changed |= deflations > 0;

            refresh_blocks(self.graph, self.root);
            let copies = copy_prop::propagate_copies(self.graph, self.root)?;
            if copies > 0 {
                changed = true;
                refresh_blocks(self.graph, self.root);
            }

            let constants =
                block_args::propagate_block_arguments(self.graph, self.observer, self.root)?;
            if constants > 0 {
                // Retry eagerly: new constants in block bodies feed the
                // next deflation round.
                changed = true;
                continue;
            }

            let mut inlinings = 0usize;
            loop {
                self.observer.notify_before(TransformKind::Inlining, body);
                let inlined = self
                    .inliner
                    .run(self.graph, self.root, self.oracle, self.policy)?;
                self.observer.notify_after(TransformKind::Inlining, body);
                if !inlined {
                    break;
                }
                inlinings += 1;
                changed = true;
            }
            debug!(rounds, deflations, inlinings, "optimizer round complete");
            if inlinings == 0 {
                break;
            }
        }
        verify_arities(self.graph, self.root)?;
        Ok(changed)
    }

    /// Run the nullness analysis once and strip the null checks it proves
    /// redundant. Separate from the main loop; callers invoke it when the
    /// graph is worth annotating.
    pub fn remove_null_checks(&mut self) -> Result<usize> {
        initialized::remove_redundant_null_checks(self.graph, self.root)
    }
}
