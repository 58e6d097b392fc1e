//! # Objective Management
//!
//! Search objectives as weighted sums over literals. Weights start out as
//! exact rationals produced by the encoder; [`RationalObjective::reduce`]
//! clears denominators by common multiplication at the last possible moment,
//! with explicit overflow detection. Integer-weighted objectives feed the
//! stratifier, the MCS engine, and the incremental upper-bound encodings used
//! by the bound-tightening algorithms.

use std::ops::Range;

use num_integer::Integer;
use num_rational::Rational64;
use num_traits::{Signed, Zero};
use rustsat::{
    encodings::{pb, pb::BoundUpper, pb::BoundUpperIncremental, CollectClauses},
    instances::ManageVars,
    types::{Assignment, Lit, TernaryVal},
};

use crate::Error;

/// Which objective a weighted sum stands for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjKind {
    Energy,
    /// Imbalance numerator of the wastage objective
    WastageNum,
    /// Utilization denominator of the wastage objective
    WastageDen,
    Migration,
    /// Combination of several objectives on a common denominator
    Merged,
}

/// A linear objective with exact rational weights
#[derive(Clone, Debug)]
pub struct RationalObjective {
    pub kind: ObjKind,
    lits: Vec<(Lit, Rational64)>,
    offset: Rational64,
}

impl RationalObjective {
    pub fn new(kind: ObjKind) -> Self {
        RationalObjective {
            kind,
            lits: vec![],
            offset: Rational64::zero(),
        }
    }

    /// Adds a term. Negative weights are normalized onto the negated literal
    /// so that all stored weights are positive.
    pub fn add_term(&mut self, lit: Lit, weight: Rational64) {
        if weight.is_zero() {
            return;
        }
        if weight.is_negative() {
            self.offset += weight;
            self.add_term(!lit, -weight);
            return;
        }
        match self.lits.iter_mut().find(|(l, _)| *l == lit) {
            Some((_, w)) => *w += weight,
            None => self.lits.push((lit, weight)),
        }
    }

    pub fn add_offset(&mut self, offset: Rational64) {
        self.offset += offset;
    }

    pub fn n_lits(&self) -> usize {
        self.lits.len()
    }

    pub fn is_constant(&self) -> bool {
        self.lits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Lit, Rational64)> + '_ {
        self.lits.iter().copied()
    }

    pub fn offset(&self) -> Rational64 {
        self.offset
    }

    /// Combines several objectives into one weighted sum on a common
    /// denominator. This is the merged strategy for divided objectives.
    pub fn merged<'a>(parts: impl IntoIterator<Item = &'a RationalObjective>) -> RationalObjective {
        let mut merged = RationalObjective::new(ObjKind::Merged);
        for part in parts {
            for (l, w) in part.iter() {
                merged.add_term(l, w);
            }
            merged.add_offset(part.offset());
        }
        merged
    }

    /// Returns an equivalent integer-weight objective by multiplying through
    /// with the least common denominator. Fails with
    /// [`Error::EncodingOverflow`] instead of wrapping silently.
    pub fn reduce(&self) -> Result<WeightedObjective, Error> {
        let mut denom: i64 = 1;
        for (_, w) in &self.lits {
            let d = *w.denom();
            let g = denom.gcd(&d);
            denom = (denom / g)
                .checked_mul(d)
                .ok_or(Error::EncodingOverflow)?;
        }
        let mut lits = Vec::with_capacity(self.lits.len());
        for (l, w) in &self.lits {
            let scaled = (*w.numer() as i128)
                .checked_mul((denom / w.denom()) as i128)
                .ok_or(Error::EncodingOverflow)?;
            debug_assert!(scaled >= 0);
            let weight: usize = scaled.try_into().map_err(|_| Error::EncodingOverflow)?;
            if weight > 0 {
                lits.push((*l, weight));
            }
        }
        Ok(WeightedObjective {
            kind: self.kind,
            lits,
            denom,
            offset: self.offset,
        })
    }
}

/// A linear objective with positive integer weights, valid on the scale
/// `1/denom` of the original rational objective
#[derive(Clone, Debug)]
pub struct WeightedObjective {
    pub kind: ObjKind,
    pub lits: Vec<(Lit, usize)>,
    /// Common denominator the rational weights were multiplied with
    pub denom: i64,
    /// Constant part of the original objective (reporting only; the search
    /// works on literal weights)
    pub offset: Rational64,
}

impl WeightedObjective {
    pub fn n_lits(&self) -> usize {
        self.lits.len()
    }

    pub fn is_constant(&self) -> bool {
        self.lits.is_empty()
    }

    /// Internal integer cost of a model: the weight sum of satisfied
    /// objective literals
    pub fn cost(&self, sol: &Assignment) -> usize {
        self.lits.iter().fold(0, |cost, &(l, w)| {
            if sol.lit_value(l) == TernaryVal::True {
                cost + w
            } else {
                cost
            }
        })
    }

    /// Soft literals for correction-subset extraction: the polarity that
    /// decreases the objective, with the weight saved by satisfying it
    pub fn soft_lits(&self) -> impl Iterator<Item = (Lit, usize)> + '_ {
        self.lits.iter().map(|&(l, w)| (!l, w))
    }

    /// Total weight, i.e., the worst possible internal cost
    pub fn weight_sum(&self) -> usize {
        self.lits.iter().map(|(_, w)| w).sum()
    }
}

/// An incremental upper-bound encoding of an integer-weight objective.
/// Constant objectives encode to nothing.
pub enum ObjEncoding {
    Weighted(pb::DbGte),
    Constant,
}

impl std::fmt::Debug for ObjEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjEncoding::Weighted(_) => f.write_str("ObjEncoding::Weighted(..)"),
            ObjEncoding::Constant => f.write_str("ObjEncoding::Constant"),
        }
    }
}

impl ObjEncoding {
    pub fn new(obj: &WeightedObjective) -> Self {
        if obj.is_constant() {
            return ObjEncoding::Constant;
        }
        ObjEncoding::Weighted(obj.lits.iter().copied().collect())
    }

    /// Extends the encoding to enforce bounds in the given range
    pub fn encode_ub_change<Col>(
        &mut self,
        range: Range<usize>,
        collector: &mut Col,
        var_manager: &mut dyn ManageVars,
    ) -> Result<(), rustsat::OutOfMemory>
    where
        Col: CollectClauses,
    {
        match self {
            ObjEncoding::Weighted(enc) => enc.encode_ub_change(range, collector, var_manager),
            ObjEncoding::Constant => Ok(()),
        }
    }

    /// Assumptions enforcing the given upper bound
    pub fn enforce_ub(&self, ub: usize) -> Result<Vec<Lit>, rustsat::encodings::Error> {
        match self {
            ObjEncoding::Weighted(enc) => enc.enforce_ub(ub),
            ObjEncoding::Constant => Ok(vec![]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustsat::lit;

    #[test]
    fn negative_weights_normalize_to_negated_literals() {
        let mut obj = RationalObjective::new(ObjKind::WastageNum);
        obj.add_term(lit![0], Rational64::from_integer(-3));
        obj.add_term(lit![1], Rational64::from_integer(2));
        assert_eq!(obj.offset(), Rational64::from_integer(-3));
        let lits: Vec<_> = obj.iter().collect();
        assert!(lits.contains(&(!lit![0], Rational64::from_integer(3))));
        assert!(lits.contains(&(lit![1], Rational64::from_integer(2))));
    }

    #[test]
    fn reduce_clears_denominators() {
        let mut obj = RationalObjective::new(ObjKind::Energy);
        obj.add_term(lit![0], Rational64::new(1, 4));
        obj.add_term(lit![1], Rational64::new(1, 6));
        obj.add_term(lit![2], Rational64::from_integer(2));
        let reduced = obj.reduce().unwrap();
        assert_eq!(reduced.denom, 12);
        let weights: Vec<_> = reduced.lits.iter().map(|&(_, w)| w).collect();
        assert_eq!(weights, vec![3, 2, 24]);
    }

    #[test]
    fn reduce_detects_overflow() {
        let mut obj = RationalObjective::new(ObjKind::Energy);
        // denominators are coprime primes near 2^31; the lcm exceeds i64
        obj.add_term(lit![0], Rational64::new(1, 2_147_483_647));
        obj.add_term(lit![1], Rational64::new(1, 2_147_483_629));
        obj.add_term(lit![2], Rational64::new(1, 2_147_483_587));
        assert!(matches!(obj.reduce(), Err(Error::EncodingOverflow)));
    }

    #[test]
    fn cost_sums_satisfied_weights() {
        let mut obj = RationalObjective::new(ObjKind::Migration);
        obj.add_term(lit![0], Rational64::from_integer(2));
        obj.add_term(lit![1], Rational64::from_integer(5));
        let reduced = obj.reduce().unwrap();
        let sol: Assignment = vec![lit![0], !lit![1]].into_iter().collect();
        assert_eq!(reduced.cost(&sol), 2);
    }
}
