//! Inlining policy: who may be inlined, not how.
//!
//! The transformation itself is an external pass behind the [`Inlining`]
//! trait; this module only answers the policy question for a candidate
//! call. Folding always supersedes inlining, and block targets defer
//! entirely to the block's own inlineability judgment.

use anyhow::Result;
use cinder_cir::{BlockId, CallId, CirGraph, CirValue, ClassRef, MethodRef, ValueId};

/// External predicates about methods and blocks, resolved by the
/// surrounding compiler.
pub trait CirOracle {
    fn never_inline(&self, method: MethodRef) -> bool;
    fn declared_foldable(&self, method: MethodRef) -> bool;
    fn block_inlineable(&self, block: BlockId) -> bool;
    /// Bytecode size of the method body, when known.
    fn code_size(&self, method: MethodRef) -> Option<usize>;
    /// Whether the method body is branch-free.
    fn is_straight_line(&self, method: MethodRef) -> bool;
}

/// An oracle with no knowledge: nothing folds, nothing inlines.
pub struct ConservativeOracle;

impl CirOracle for ConservativeOracle {
    fn never_inline(&self, _method: MethodRef) -> bool {
        false
    }
    fn declared_foldable(&self, _method: MethodRef) -> bool {
        false
    }
    fn block_inlineable(&self, _block: BlockId) -> bool {
        false
    }
    fn code_size(&self, _method: MethodRef) -> Option<usize> {
        None
    }
    fn is_straight_line(&self, _method: MethodRef) -> bool {
        false
    }
}

/// Heuristic for method targets that passed the hard gates.
pub trait InliningPolicy {
    fn should_inline(
        &self,
        g: &CirGraph,
        oracle: &dyn CirOracle,
        method: MethodRef,
        arguments: &[ValueId],
    ) -> bool;

    /// The interface type used to resolve accessor-style dispatch calls, a
    /// detail consumed by the surrounding compiler.
    fn accessor_interface(&self) -> Option<ClassRef> {
        None
    }
}

/// The null policy: no method call is ever worth inlining.
pub struct NoInlining;

impl InliningPolicy for NoInlining {
    fn should_inline(
        &self,
        _g: &CirGraph,
        _oracle: &dyn CirOracle,
        _method: MethodRef,
        _arguments: &[ValueId],
    ) -> bool {
        false
    }
}

/// Inline small or branch-free methods. The dynamic, profile-aware variant
/// currently applies the same thresholds as the static one.
pub struct SizeHeuristic {
    pub max_code_size: usize,
}

impl SizeHeuristic {
    const DEFAULT_MAX_CODE_SIZE: usize = 25;

    pub fn static_profile() -> Self {
        SizeHeuristic {
            max_code_size: Self::DEFAULT_MAX_CODE_SIZE,
        }
    }

    pub fn dynamic_profile() -> Self {
        Self::static_profile()
    }
}

impl InliningPolicy for SizeHeuristic {
    fn should_inline(
        &self,
        _g: &CirGraph,
        oracle: &dyn CirOracle,
        method: MethodRef,
        _arguments: &[ValueId],
    ) -> bool {
        if oracle.is_straight_line(method) {
            return true;
        }
        oracle
            .code_size(method)
            .is_some_and(|size| size <= self.max_code_size)
    }
}

/// Whether the external inliner may touch `call` at all.
pub fn is_inlineable(
    g: &CirGraph,
    oracle: &dyn CirOracle,
    policy: &dyn InliningPolicy,
    call: CallId,
) -> bool {
    let c = &g.calls[call];
    match g.value(c.procedure) {
        CirValue::Block(b) => oracle.block_inlineable(*b),
        CirValue::Method(m) => {
            !oracle.never_inline(*m)
                && !oracle.declared_foldable(*m)
                && policy.should_inline(g, oracle, *m, &c.arguments)
        }
        _ => false,
    }
}

/// The external inlining transformation, consumed opaquely by the driver.
pub trait Inlining {
    /// Perform one round of inlining over the graph. Returns whether the
    /// graph changed.
    fn run(
        &mut self,
        g: &mut CirGraph,
        root: ValueId,
        oracle: &dyn CirOracle,
        policy: &dyn InliningPolicy,
    ) -> Result<bool>;
}

/// An inliner that changes nothing.
pub struct NoOpInlining;

impl Inlining for NoOpInlining {
    fn run(
        &mut self,
        _g: &mut CirGraph,
        _root: ValueId,
        _oracle: &dyn CirOracle,
        _policy: &dyn InliningPolicy,
    ) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_cir::{ValueKind, VarRole};

    struct ScriptedOracle {
        never: bool,
        foldable: bool,
        block: bool,
        size: Option<usize>,
        straight: bool,
    }

    impl Default for ScriptedOracle {
        fn default() -> Self {
            ScriptedOracle {
                never: false,
                foldable: false,
                block: false,
                size: None,
                straight: false,
            }
        }
    }

    impl CirOracle for ScriptedOracle {
        fn never_inline(&self, _m: MethodRef) -> bool {
            self.never
        }
        fn declared_foldable(&self, _m: MethodRef) -> bool {
            self.foldable
        }
        fn block_inlineable(&self, _b: BlockId) -> bool {
            self.block
        }
        fn code_size(&self, _m: MethodRef) -> Option<usize> {
            self.size
        }
        fn is_straight_line(&self, _m: MethodRef) -> bool {
            self.straight
        }
    }

    struct AlwaysInline;

    impl InliningPolicy for AlwaysInline {
        fn should_inline(
            &self,
            _g: &CirGraph,
            _oracle: &dyn CirOracle,
            _m: MethodRef,
            _a: &[ValueId],
        ) -> bool {
            true
        }
    }

    fn method_call(g: &mut CirGraph) -> CallId {
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ke = g.new_var(ValueKind::Reference, VarRole::ExceptionContinuation);
        let ku = g.use_var(k);
        let keu = g.use_var(ke);
        let m = g.alloc_value(CirValue::Method(MethodRef(1)));
        g.call(m, vec![ku, keu])
    }

    #[test]
    fn hard_gates_override_the_policy() {
        let mut g = CirGraph::new();
        let call = method_call(&mut g);
        let mut oracle = ScriptedOracle::default();
        assert!(is_inlineable(&g, &oracle, &AlwaysInline, call));

        oracle.never = true;
        assert!(!is_inlineable(&g, &oracle, &AlwaysInline, call));

        oracle.never = false;
        oracle.foldable = true;
        assert!(!is_inlineable(&g, &oracle, &AlwaysInline, call));
    }

    #[test]
    fn block_target_defers_to_block_judgment() {
        let mut g = CirGraph::new();
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ku = g.use_var(k);
        let exit = g.call(ku, vec![]);
        let inner = g.closure(vec![], exit);
        let (_b, bv) = g.block(cinder_cir::BlockRole::Normal, inner);
        let site = g.call(bv, vec![]);

        let mut oracle = ScriptedOracle::default();
        // NoInlining would refuse a method, but blocks bypass the policy.
        assert!(!is_inlineable(&g, &oracle, &NoInlining, site));
        oracle.block = true;
        assert!(is_inlineable(&g, &oracle, &NoInlining, site));
    }

    #[test]
    fn size_heuristic_thresholds() {
        let mut g = CirGraph::new();
        let call = method_call(&mut g);
        let policy = SizeHeuristic::static_profile();

        let mut oracle = ScriptedOracle::default();
        assert!(!is_inlineable(&g, &oracle, &policy, call));

        oracle.size = Some(SizeHeuristic::DEFAULT_MAX_CODE_SIZE);
        assert!(is_inlineable(&g, &oracle, &policy, call));

        oracle.size = Some(SizeHeuristic::DEFAULT_MAX_CODE_SIZE + 1);
        assert!(!is_inlineable(&g, &oracle, &policy, call));

        // Straight-line code is worth inlining whatever its size.
        oracle.straight = true;
        assert!(is_inlineable(&g, &oracle, &policy, call));
    }
}
