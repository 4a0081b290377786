//! Compile-time constant values and their kinds.
//!
//! A [`ConstValue`] is the payload of a `CirValue::Constant` node: the result
//! of folding, or a literal that survived from the front end. The accessors
//! mirror what the strength-reduction and folding rules actually ask of a
//! constant (is it zero, is it all ones, widen me to a long).

use std::fmt;

/// The kind of a runtime value, as far as this IR cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Word,
    Boolean,
    Reference,
    Void,
}

impl ValueKind {
    pub fn is_reference(&self) -> bool {
        matches!(self, ValueKind::Reference)
    }
}

/// An opaque handle to a heap object owned by the meta-evaluation service.
///
/// The optimizer never looks inside an object; it only threads handles
/// between folds and compares them by identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectHandle(pub u64);

/// An immutable constant carried by the IR.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Word(u64),
    Boolean(bool),
    /// The null reference.
    Null,
    /// A non-null reference, resolved by the meta-evaluation collaborator.
    Object(ObjectHandle),
}

impl ConstValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ConstValue::Int(_) => ValueKind::Int,
            ConstValue::Long(_) => ValueKind::Long,
            ConstValue::Float(_) => ValueKind::Float,
            ConstValue::Double(_) => ValueKind::Double,
            ConstValue::Word(_) => ValueKind::Word,
            ConstValue::Boolean(_) => ValueKind::Boolean,
            ConstValue::Null | ConstValue::Object(_) => ValueKind::Reference,
        }
    }

    /// Whether this is a scalar (non-reference) constant.
    pub fn is_scalar(&self) -> bool {
        !self.kind().is_reference()
    }

    pub fn to_int(&self) -> Option<i32> {
        match self {
            ConstValue::Int(i) => Some(*i),
            ConstValue::Boolean(b) => Some(*b as i32),
            ConstValue::Long(l) => Some(*l as i32),
            ConstValue::Word(w) => Some(*w as i32),
            _ => None,
        }
    }

    pub fn to_long(&self) -> Option<i64> {
        match self {
            ConstValue::Int(i) => Some(*i as i64),
            ConstValue::Long(l) => Some(*l),
            ConstValue::Boolean(b) => Some(*b as i64),
            ConstValue::Word(w) => Some(*w as i64),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            ConstValue::Int(i) => *i == 0,
            ConstValue::Long(l) => *l == 0,
            ConstValue::Float(f) => *f == 0.0,
            ConstValue::Double(d) => *d == 0.0,
            ConstValue::Word(w) => *w == 0,
            ConstValue::Boolean(b) => !*b,
            _ => false,
        }
    }

    pub fn is_all_ones(&self) -> bool {
        match self {
            ConstValue::Int(i) => *i == -1,
            ConstValue::Long(l) => *l == -1,
            ConstValue::Word(w) => *w == u64::MAX,
            _ => false,
        }
    }

    /// Representation equality: floats compare by bit pattern, so `0.0` and
    /// `-0.0` are distinct and a NaN is identical to itself. This is the
    /// equality rewrites must use before treating two constants as
    /// interchangeable.
    pub fn identical(&self, other: &ConstValue) -> bool {
        match (self, other) {
            (ConstValue::Float(a), ConstValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ConstValue::Double(a), ConstValue::Double(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(i) => write!(f, "{i}"),
            ConstValue::Long(l) => write!(f, "{l}L"),
            ConstValue::Float(x) => write!(f, "{x}f"),
            ConstValue::Double(x) => write!(f, "{x}d"),
            ConstValue::Word(w) => write!(f, "0x{w:x}"),
            ConstValue::Boolean(b) => write!(f, "{b}"),
            ConstValue::Null => write!(f, "null"),
            ConstValue::Object(h) => write!(f, "obj#{}", h.0),
        }
    }
}
