//! High-level Java-like operators and their trap behavior.
//!
//! Operators are the callable nodes that survive from bytecode translation:
//! allocation, field and array access, virtual dispatch. Each carries the set
//! of reasons it may abnormally exit ([`Traps`]); analyses narrow that set,
//! which is how a proven-redundant null check is dropped before lowering.

use bitflags::bitflags;

use crate::lit::ValueKind;

/// An opaque handle to an externally resolved method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodRef(pub u32);

/// An opaque handle to an externally resolved field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldRef(pub u32);

/// An opaque handle to an externally resolved class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassRef(pub u32);

bitflags! {
    /// Reasons an operator call may abnormally exit to its exception
    /// continuation. Lowering emits a runtime check per remaining flag.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Traps: u8 {
        const NULL_POINTER = 1 << 0;
        const ARITHMETIC = 1 << 1;
        const ARRAY_BOUNDS = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JavaOpKind {
    /// Allocate an instance of a class; produces a non-null reference.
    New { class: ClassRef },
    GetField { field: FieldRef, kind: ValueKind },
    PutField { field: FieldRef },
    ArrayLoad { kind: ValueKind },
    ArrayStore,
    ArrayLength,
    InvokeVirtual { method: MethodRef },
    InvokeInterface { method: MethodRef },
}

/// A Java-level operator node: the operation plus its current trap set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JavaOp {
    pub kind: JavaOpKind,
    pub can_trap: Traps,
}

impl JavaOp {
    pub fn new(kind: JavaOpKind) -> Self {
        let can_trap = match kind {
            JavaOpKind::New { .. } => Traps::empty(),
            JavaOpKind::GetField { .. } | JavaOpKind::PutField { .. } => Traps::NULL_POINTER,
            JavaOpKind::ArrayLoad { .. } | JavaOpKind::ArrayStore => {
                Traps::NULL_POINTER | Traps::ARRAY_BOUNDS
            }
            JavaOpKind::ArrayLength => Traps::NULL_POINTER,
            JavaOpKind::InvokeVirtual { .. } | JavaOpKind::InvokeInterface { .. } => {
                Traps::NULL_POINTER
            }
        };
        JavaOp { kind, can_trap }
    }

    /// Whether the first value argument is a receiver that must be non-null.
    pub fn requires_receiver(&self) -> bool {
        !matches!(self.kind, JavaOpKind::New { .. })
    }

    /// Whether the operator produces a reference that is known non-null.
    pub fn produces_initialized(&self) -> bool {
        matches!(self.kind, JavaOpKind::New { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_trap_sets() {
        let get = JavaOp::new(JavaOpKind::GetField {
            field: FieldRef(0),
            kind: ValueKind::Int,
        });
        assert!(get.can_trap.contains(Traps::NULL_POINTER));
        assert!(get.requires_receiver());

        let new = JavaOp::new(JavaOpKind::New { class: ClassRef(0) });
        assert!(new.can_trap.is_empty());
        assert!(!new.requires_receiver());
        assert!(new.produces_initialized());

        let load = JavaOp::new(JavaOpKind::ArrayLoad {
            kind: ValueKind::Reference,
        });
        assert!(load.can_trap.contains(Traps::ARRAY_BOUNDS));
    }
}
