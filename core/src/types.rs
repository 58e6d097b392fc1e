//! # Shared Types
//!
//! Value types exchanged between the encoder, the search algorithms, the
//! archive, and external callers.

use std::{fmt, ops::Index};

use num_rational::Rational64;
use num_traits::Zero;

/// Composite key identifying a virtual machine within an instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmRef {
    pub job: usize,
    pub index: usize,
}

impl fmt::Display for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.job, self.index)
    }
}

/// Exact cost value of one objective
pub type Cost = Rational64;

/// An objective vector in evaluation space. Components are exact rationals;
/// dominance comparisons never round.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CostVec(pub Vec<Cost>);

impl CostVec {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Componentwise `<=` over vectors of equal length
    pub fn weakly_dominates(&self, other: &CostVec) -> bool {
        debug_assert_eq!(self.0.len(), other.0.len());
        self.0.iter().zip(&other.0).all(|(a, b)| a <= b)
    }

    /// Componentwise `<=` with at least one strict component
    pub fn dominates(&self, other: &CostVec) -> bool {
        self.weakly_dominates(other) && self != other
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cost> {
        self.0.iter()
    }

    /// The all-zero vector of the given dimension
    pub fn zero(dim: usize) -> Self {
        CostVec(vec![Cost::zero(); dim])
    }
}

impl Index<usize> for CostVec {
    type Output = Cost;

    fn index(&self, idx: usize) -> &Cost {
        &self.0[idx]
    }
}

impl fmt::Display for CostVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (idx, c) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

/// An assignment of every virtual machine to one physical machine. Indexed by
/// the global VM index (jobs in instance order, VMs in job order).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Placement(Vec<usize>);

impl Placement {
    pub fn new(assignment: Vec<usize>) -> Self {
        Placement(assignment)
    }

    /// The empty placement of an instance without virtual machines
    pub fn empty() -> Self {
        Placement(vec![])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The physical machine hosting the VM with the given global index
    pub fn pm(&self, vm_idx: usize) -> usize {
        self.0[vm_idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0.iter().copied().enumerate()
    }

    /// Number of VM assignments on which two placements differ
    pub fn distance(&self, other: &Placement) -> usize {
        debug_assert_eq!(self.0.len(), other.0.len());
        self.0
            .iter()
            .zip(&other.0)
            .filter(|(a, b)| a != b)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cv(vals: &[i64]) -> CostVec {
        CostVec(vals.iter().map(|&v| Cost::from_integer(v)).collect())
    }

    #[test]
    fn dominance_is_strict() {
        assert!(cv(&[1, 2]).dominates(&cv(&[1, 3])));
        assert!(cv(&[1, 2]).dominates(&cv(&[2, 2])));
        assert!(!cv(&[1, 2]).dominates(&cv(&[1, 2])));
        assert!(!cv(&[1, 3]).dominates(&cv(&[3, 1])));
        assert!(!cv(&[3, 1]).dominates(&cv(&[1, 3])));
    }

    #[test]
    fn placement_distance() {
        let a = Placement::new(vec![0, 1, 2]);
        let b = Placement::new(vec![0, 2, 2]);
        assert_eq!(a.distance(&b), 1);
        assert_eq!(a.distance(&a), 0);
    }
}
