//! Abstract value domains for dataflow analysis.
//!
//! A domain is a bounded meet-semilattice. `bottom` is the conservative
//! element ("reachable from anywhere, nothing known"), `top` the neutral one;
//! merging facts moves monotonically toward `bottom`, which is what bounds
//! the fixed-point iteration of the dataflow engine.
//!
//! Concrete domains supply only the five nontrivial primitives plus the
//! constant injection; the derived total operations handle every boundary
//! case here, so a concrete domain cannot accidentally break the lattice
//! laws at top or bottom.

use cinder_cir::ConstValue;

pub trait ValueDomain {
    type Elem: Clone + Eq + std::fmt::Debug;

    fn top(&self) -> Self::Elem;
    fn bottom(&self) -> Self::Elem;
    fn is_top(&self, e: &Self::Elem) -> bool;
    fn is_bottom(&self, e: &Self::Elem) -> bool;

    /// Meet of two elements that are neither equal nor top nor bottom.
    fn meet_nontrivial(&self, a: &Self::Elem, b: &Self::Elem) -> Self::Elem;

    /// Equality of two elements that are not identical and neither top nor
    /// bottom.
    fn eq_nontrivial(&self, a: &Self::Elem, b: &Self::Elem) -> bool;

    /// Partial order between two elements that are neither equal nor top nor
    /// bottom.
    fn le_nontrivial(&self, a: &Self::Elem, b: &Self::Elem) -> bool;

    /// The abstract value of a literal constant.
    fn from_constant(&self, c: &ConstValue) -> Self::Elem;

    fn meet(&self, a: &Self::Elem, b: &Self::Elem) -> Self::Elem {
        if a == b {
            return a.clone();
        }
        if self.is_bottom(a) || self.is_bottom(b) {
            return self.bottom();
        }
        if self.is_top(a) {
            return b.clone();
        }
        if self.is_top(b) {
            return a.clone();
        }
        self.meet_nontrivial(a, b)
    }

    fn equal(&self, a: &Self::Elem, b: &Self::Elem) -> bool {
        if a == b {
            return true;
        }
        if self.is_top(a) || self.is_top(b) || self.is_bottom(a) || self.is_bottom(b) {
            return false;
        }
        self.eq_nontrivial(a, b)
    }

    fn less_or_equal(&self, a: &Self::Elem, b: &Self::Elem) -> bool {
        if self.is_bottom(a) || self.is_top(b) {
            return true;
        }
        if self.is_top(a) {
            return false;
        }
        if self.is_bottom(b) {
            return false;
        }
        if a == b {
            return true;
        }
        self.le_nontrivial(a, b)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Check the semilattice laws on a sample of elements of any domain.
    pub(crate) fn check_semilattice_laws<D: ValueDomain>(domain: &D, sample: &[D::Elem]) {
        let bottom = domain.bottom();
        let top = domain.top();
        for a in sample {
            assert_eq!(&domain.meet(a, a), a, "meet(a,a) = a for {a:?}");
            assert_eq!(domain.meet(&bottom, a), bottom);
            assert_eq!(&domain.meet(&top, a), a);
            assert!(domain.less_or_equal(&bottom, a));
            assert!(domain.less_or_equal(a, &top));
            for b in sample {
                assert_eq!(
                    domain.meet(a, b),
                    domain.meet(b, a),
                    "meet commutes for {a:?}, {b:?}"
                );
                // The meet is a lower bound of both operands.
                assert!(domain.less_or_equal(&domain.meet(a, b), a));
                assert!(domain.less_or_equal(&domain.meet(a, b), b));
            }
        }
    }
}
