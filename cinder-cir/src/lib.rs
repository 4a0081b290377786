//! Continuation-passing intermediate representation (CIR) for a method JIT.
//!
//! This crate provides the graph of CPS nodes that the optimizer crate
//! rewrites in place. A method body is a single [`CirCall`] tree: every
//! operation is a call, and control flow is expressed by passing
//! continuations as trailing arguments. By convention the last one or two
//! arguments of a call are the normal-return continuation and, for calls
//! that may fail, the exception continuation.
//!
//! # Node identity
//!
//! Nodes live in [`id_arena::Arena`]s and are addressed by stable ids; a node
//! is shared, not copied, across every call that references it, and mutating
//! it through the graph is visible to all referents. Identity-sensitive maps
//! (visited sets, continuation aliasing) key on arena ids.
//!
//! # Key Types
//!
//! - [`CirGraph`]: the arenas plus allocation and rewriting helpers
//! - [`CirCall`]: `procedure(arguments…)`, the unit of computation
//! - [`CirValue`]: the closed union of things a call can mention
//! - [`CirClosure`] / [`CirContinuation`]: CPS lambdas, mutable in place
//! - [`CirBlock`]: a shared closure with a call-site list (loop headers,
//!   merge points)
//! - [`CirVariable`]: an identity-unique binding site with a role
//!
//! # Modules
//!
//! - [`builtin`]: primitive operators and their foldable variants
//! - [`lit`]: compile-time constants
//! - [`operator`]: Java-level operators and trap sets
//! - [`walk`]: worklist traversal, substitution, invariant checks

use id_arena::{Arena, Id};

pub mod builtin;
pub mod lit;
pub mod operator;
pub mod walk;

pub use builtin::{BuiltinOp, CirBuiltin, Variant};
pub use lit::{ConstValue, ObjectHandle, ValueKind};
pub use operator::{ClassRef, FieldRef, JavaOp, JavaOpKind, MethodRef, Traps};

pub type CallId = Id<CirCall>;
pub type ValueId = Id<CirValueW>;
pub type VarId = Id<CirVariable>;
pub type BlockId = Id<CirBlock>;

/// A call: apply `procedure` to `arguments`.
///
/// Calls are rewritten in place; [`CirGraph::assign_call`] keeps block
/// call-site lists consistent when the procedure changes.
#[derive(Clone, Debug, PartialEq)]
pub struct CirCall {
    pub procedure: ValueId,
    pub arguments: Vec<ValueId>,
    /// Deoptimization frame: the abstract interpreter state to rebuild if
    /// execution must continue in a lower compilation tier at this call.
    pub frame: Option<FrameDescriptor>,
}

impl CirCall {
    pub fn shape(&self) -> CallShape {
        CallShape {
            procedure: self.procedure,
            arguments: self.arguments.clone(),
            frame: self.frame.clone(),
        }
    }
}

/// The replacement shape produced by a local rewrite of a call.
#[derive(Clone, Debug, PartialEq)]
pub struct CallShape {
    pub procedure: ValueId,
    pub arguments: Vec<ValueId>,
    pub frame: Option<FrameDescriptor>,
}

impl CallShape {
    pub fn new(procedure: ValueId, arguments: Vec<ValueId>) -> Self {
        CallShape {
            procedure,
            arguments,
            frame: None,
        }
    }
}

/// A deoptimization frame descriptor attached to a call.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct FrameDescriptor {
    pub locals: Vec<ValueId>,
    pub stack: Vec<ValueId>,
}

impl FrameDescriptor {
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut ValueId> {
        self.locals.iter_mut().chain(self.stack.iter_mut())
    }

    pub fn slots(&self) -> impl Iterator<Item = &ValueId> {
        self.locals.iter().chain(self.stack.iter())
    }
}

/// The role a variable plays in its binding closure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VarRole {
    Local,
    NormalContinuation,
    ExceptionContinuation,
}

impl VarRole {
    pub fn is_continuation(&self) -> bool {
        matches!(
            self,
            VarRole::NormalContinuation | VarRole::ExceptionContinuation
        )
    }
}

/// An identity-unique binding site. Two variables are the same binding iff
/// their [`VarId`]s are equal; `serial` exists for diagnostics only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CirVariable {
    pub serial: u32,
    pub kind: ValueKind,
    pub role: VarRole,
}

/// A CPS lambda: parameters plus a body call. Both fields may be rewritten
/// in place by passes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CirClosure {
    pub parameters: Vec<VarId>,
    pub body: CallId,
}

/// An inline continuation: a closure of zero or one parameter that is not
/// shared between call sites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CirContinuation {
    pub parameter: Option<VarId>,
    pub body: CallId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockRole {
    Normal,
    ExceptionDispatcher,
}

/// A shared basic block: a closure wrapper that may be targeted by many
/// calls. The call-site list is kept consistent with in-place mutation and
/// is what propagation passes reason over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CirBlock {
    pub role: BlockRole,
    /// Always a `CirValue::Closure`.
    pub closure: ValueId,
    pub call_sites: Vec<CallId>,
}

/// The closed union of values a call can mention.
#[derive(Clone, Debug, PartialEq)]
pub enum CirValue {
    Constant(ConstValue),
    Variable(VarId),
    Closure(CirClosure),
    Block(BlockId),
    Continuation(CirContinuation),
    Builtin(CirBuiltin),
    Method(MethodRef),
    Operator(JavaOp),
    Switch(CirSwitch),
    /// Sentinel for an unreachable continuation.
    Undefined,
}

/// Wrapper so the value arena has a distinct element type.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct CirValueW {
    pub value: CirValue,
}

impl From<CirValue> for CirValueW {
    fn from(value: CirValue) -> Self {
        Self { value }
    }
}

impl From<CirValueW> for CirValue {
    fn from(value: CirValueW) -> Self {
        value.value
    }
}

/// An integer-equality multi-way branch.
///
/// Call layout: `switch(tag, m₁ … mₙ, k₁ … kₙ, k_default)` where `mᵢ` are the
/// match values and `kᵢ` the branch continuations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CirSwitch {
    pub matches: usize,
}

impl CirSwitch {
    pub fn arity(&self) -> usize {
        2 * self.matches + 2
    }

    pub fn tag_index(&self) -> usize {
        0
    }

    pub fn match_index(&self, i: usize) -> usize {
        1 + i
    }

    pub fn target_index(&self, i: usize) -> usize {
        1 + self.matches + i
    }

    pub fn default_index(&self) -> usize {
        1 + 2 * self.matches
    }
}

/// The arenas holding one method's CIR, plus allocation and rewriting
/// helpers. One graph per compilation; graphs are not designed for
/// concurrent mutation.
#[derive(Default, Debug)]
pub struct CirGraph {
    pub calls: Arena<CirCall>,
    pub values: Arena<CirValueW>,
    pub vars: Arena<CirVariable>,
    pub blocks: Arena<CirBlock>,
    next_serial: u32,
}

impl CirGraph {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn value(&self, id: ValueId) -> &CirValue {
        &self.values[id].value
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut CirValue {
        &mut self.values[id].value
    }

    pub fn alloc_value(&mut self, value: CirValue) -> ValueId {
        self.values.alloc(value.into())
    }

    pub fn new_var(&mut self, kind: ValueKind, role: VarRole) -> VarId {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.vars.alloc(CirVariable { serial, kind, role })
    }

    /// Allocate a value node referencing `var`.
    pub fn use_var(&mut self, var: VarId) -> ValueId {
        self.alloc_value(CirValue::Variable(var))
    }

    pub fn constant(&mut self, c: ConstValue) -> ValueId {
        self.alloc_value(CirValue::Constant(c))
    }

    pub fn builtin(&mut self, b: CirBuiltin) -> ValueId {
        self.alloc_value(CirValue::Builtin(b))
    }

    pub fn undefined(&mut self) -> ValueId {
        self.alloc_value(CirValue::Undefined)
    }

    pub fn closure(&mut self, parameters: Vec<VarId>, body: CallId) -> ValueId {
        self.alloc_value(CirValue::Closure(CirClosure { parameters, body }))
    }

    pub fn continuation(&mut self, parameter: Option<VarId>, body: CallId) -> ValueId {
        self.alloc_value(CirValue::Continuation(CirContinuation { parameter, body }))
    }

    /// Allocate a block wrapping `closure` and the value node referencing it.
    pub fn block(&mut self, role: BlockRole, closure: ValueId) -> (BlockId, ValueId) {
        let b = self.blocks.alloc(CirBlock {
            role,
            closure,
            call_sites: Vec::new(),
        });
        (b, self.alloc_value(CirValue::Block(b)))
    }

    /// Allocate a call and register it with its target block, if any.
    pub fn call(&mut self, procedure: ValueId, arguments: Vec<ValueId>) -> CallId {
        let c = self.calls.alloc(CirCall {
            procedure,
            arguments,
            frame: None,
        });
        self.register_call(c);
        c
    }

    /// Overwrite `call` in place with `shape`, maintaining block call-site
    /// lists on both the old and the new target.
    pub fn assign_call(&mut self, call: CallId, shape: CallShape) {
        self.unregister_call(call);
        let c = &mut self.calls[call];
        c.procedure = shape.procedure;
        c.arguments = shape.arguments;
        c.frame = shape.frame;
        self.register_call(call);
    }

    /// Splice the call `body` into the site `call` (beta-reduction tail).
    pub fn splice_body(&mut self, call: CallId, body: CallId) {
        let shape = self.calls[body].shape();
        self.assign_call(call, shape);
    }

    fn register_call(&mut self, call: CallId) {
        if let CirValue::Block(b) = self.values[self.calls[call].procedure].value {
            let sites = &mut self.blocks[b].call_sites;
            if !sites.contains(&call) {
                sites.push(call);
            }
        }
    }

    fn unregister_call(&mut self, call: CallId) {
        if let CirValue::Block(b) = self.values[self.calls[call].procedure].value {
            self.blocks[b].call_sites.retain(|c| *c != call);
        }
    }

    pub fn as_constant(&self, id: ValueId) -> Option<&ConstValue> {
        match self.value(id) {
            CirValue::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_variable(&self, id: ValueId) -> Option<VarId> {
        match self.value(id) {
            CirValue::Variable(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_block(&self, id: ValueId) -> Option<BlockId> {
        match self.value(id) {
            CirValue::Block(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_closure(&self, id: ValueId) -> Option<&CirClosure> {
        match self.value(id) {
            CirValue::Closure(c) => Some(c),
            _ => None,
        }
    }

    /// The closure wrapped by `block`, or `None` if the graph is malformed.
    pub fn block_closure(&self, block: BlockId) -> Option<&CirClosure> {
        self.as_closure(self.blocks[block].closure)
    }

    pub fn var_role(&self, var: VarId) -> VarRole {
        self.vars[var].role
    }

    /// Whether `id` is a variable playing a continuation role.
    pub fn is_continuation_var(&self, id: ValueId) -> bool {
        self.as_variable(id)
            .is_some_and(|v| self.vars[v].role.is_continuation())
    }

    /// Whether two argument values are the same by the equality that
    /// argument propagation uses: constants by value, everything else by
    /// node identity.
    pub fn same_argument(&self, a: ValueId, b: ValueId) -> bool {
        if a == b {
            return true;
        }
        match (self.value(a), self.value(b)) {
            (CirValue::Constant(x), CirValue::Constant(y)) => x.identical(y),
            (CirValue::Variable(x), CirValue::Variable(y)) => x == y,
            (CirValue::Block(x), CirValue::Block(y)) => x == y,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_site_registration_follows_assignment() {
        let mut g = CirGraph::new();
        let k = g.new_var(ValueKind::Reference, VarRole::NormalContinuation);
        let ku = g.use_var(k);
        let x = g.constant(ConstValue::Int(1));
        let exit = g.call(ku, vec![x]);
        let body = g.closure(vec![], exit);
        let (b, bv) = g.block(BlockRole::Normal, body);

        let site = g.call(bv, vec![]);
        assert_eq!(g.blocks[b].call_sites, vec![site]);

        // Retargeting the call away from the block empties the site list.
        g.assign_call(site, CallShape::new(ku, vec![x]));
        assert!(g.blocks[b].call_sites.is_empty());
    }

    #[test]
    fn same_argument_compares_constants_by_value() {
        let mut g = CirGraph::new();
        let a = g.constant(ConstValue::Int(5));
        let b = g.constant(ConstValue::Int(5));
        let c = g.constant(ConstValue::Int(6));
        assert!(g.same_argument(a, b));
        assert!(!g.same_argument(a, c));

        let v = g.new_var(ValueKind::Int, VarRole::Local);
        let u1 = g.use_var(v);
        let u2 = g.use_var(v);
        assert!(g.same_argument(u1, u2));
    }

    #[test]
    fn switch_layout() {
        let s = CirSwitch { matches: 3 };
        assert_eq!(s.arity(), 8);
        assert_eq!(s.tag_index(), 0);
        assert_eq!(s.match_index(2), 3);
        assert_eq!(s.target_index(0), 4);
        assert_eq!(s.default_index(), 7);
    }
}
