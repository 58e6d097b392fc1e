//! # Archive of Non-Dominated Solutions
//!
//! Insertion-ordered set of objective vectors, each with one or more
//! placement witnesses. Insertion prunes dominated entries immediately, so
//! the archive is an antichain under Pareto dominance at all times and never
//! re-orders past entries. Populations can be dumped to and reloaded from a
//! text representation for offline analysis.

use std::io::{BufRead, Write};

use anyhow::Context;

use crate::types::{Cost, CostVec, Placement};

/// Outcome of an insertion attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The point (or a new witness of an existing point) was added; any
    /// entries it dominates were pruned
    Inserted,
    /// The entry is weakly dominated by an existing one
    Dominated,
    /// An entry with equal costs already carries this witness
    Duplicate,
}

/// One archive entry: a non-dominated point in objective space with the
/// placements that attain it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub costs: CostVec,
    sols: Vec<Placement>,
}

impl Entry {
    /// The first witness recorded for this point
    pub fn witness(&self) -> &Placement {
        &self.sols[0]
    }

    pub fn n_sols(&self) -> usize {
        self.sols.len()
    }

    /// Iterates all witnesses in discovery order
    pub fn sols(&self) -> std::slice::Iter<'_, Placement> {
        self.sols.iter()
    }
}

/// A non-dominated archive of solutions
#[derive(Clone, Debug, Default)]
pub struct Archive {
    entries: Vec<Entry>,
}

impl Archive {
    pub fn new() -> Self {
        Archive::default()
    }

    /// Inserts a candidate, pruning everything it strictly dominates. A
    /// candidate with the costs of an existing point becomes an additional
    /// witness of that point; duplicates are detected by witness equality.
    /// Amortised linear in the archive size.
    pub fn insert(&mut self, costs: CostVec, witness: Placement) -> InsertOutcome {
        for entry in &mut self.entries {
            if entry.costs == costs {
                if entry.sols.contains(&witness) {
                    return InsertOutcome::Duplicate;
                }
                entry.sols.push(witness);
                return InsertOutcome::Inserted;
            }
        }
        if self
            .entries
            .iter()
            .any(|entry| entry.costs.weakly_dominates(&costs))
        {
            return InsertOutcome::Dominated;
        }
        self.entries.retain(|entry| !costs.dominates(&entry.costs));
        self.entries.push(Entry {
            costs,
            sols: vec![witness],
        });
        InsertOutcome::Inserted
    }

    pub fn contains(&self, costs: &CostVec) -> bool {
        self.entries.iter().any(|e| &e.costs == costs)
    }

    /// Number of non-dominated points
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Dumps the population: one line per solution carrying the exact
    /// objective vector and the machine index of every VM
    pub fn write_population<W: Write>(&self, writer: &mut W) -> anyhow::Result<()> {
        for entry in &self.entries {
            for sol in &entry.sols {
                for cost in entry.costs.iter() {
                    write!(writer, "{cost} ")?;
                }
                write!(writer, "|")?;
                for (_, pm) in sol.iter() {
                    write!(writer, " {pm}")?;
                }
                writeln!(writer)?;
            }
        }
        Ok(())
    }

    /// Reloads a dumped population. Dominance pruning applies again, so
    /// reloading an archive dump reproduces it entry for entry.
    pub fn read_population<R: BufRead>(reader: R) -> anyhow::Result<Archive> {
        let mut archive = Archive::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (costs, placement) = line
                .split_once('|')
                .with_context(|| format!("population line {number} misses the separator"))?;
            let costs: Vec<Cost> = costs
                .split_whitespace()
                .map(|f| f.parse().map_err(anyhow::Error::msg))
                .collect::<anyhow::Result<_>>()
                .with_context(|| format!("invalid cost on population line {number}"))?;
            let placement: Vec<usize> = placement
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .with_context(|| format!("invalid machine index on population line {number}"))?;
            archive.insert(CostVec(costs), Placement::new(placement));
        }
        Ok(archive)
    }
}

impl<'a> IntoIterator for &'a Archive {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cost;

    fn cv(vals: &[i64]) -> CostVec {
        CostVec(vals.iter().map(|&v| Cost::from_integer(v)).collect())
    }

    fn wit(pm: usize) -> Placement {
        Placement::new(vec![pm])
    }

    #[test]
    fn insert_prunes_dominated() {
        let mut archive = Archive::new();
        assert_eq!(archive.insert(cv(&[2, 2]), wit(0)), InsertOutcome::Inserted);
        assert_eq!(archive.insert(cv(&[1, 3]), wit(1)), InsertOutcome::Inserted);
        assert_eq!(archive.len(), 2);
        // dominates the first entry but not the second
        assert_eq!(archive.insert(cv(&[1, 2]), wit(2)), InsertOutcome::Inserted);
        assert_eq!(archive.len(), 2);
        assert!(archive.contains(&cv(&[1, 3])));
        assert!(!archive.contains(&cv(&[2, 2])));
    }

    #[test]
    fn dominated_candidates_are_rejected() {
        let mut archive = Archive::new();
        archive.insert(cv(&[1, 1]), wit(0));
        assert_eq!(archive.insert(cv(&[1, 2]), wit(1)), InsertOutcome::Dominated);
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn equal_vectors_merge_into_one_point() {
        let mut archive = Archive::new();
        archive.insert(cv(&[1, 1]), wit(0));
        assert_eq!(archive.insert(cv(&[1, 1]), wit(0)), InsertOutcome::Duplicate);
        assert_eq!(archive.insert(cv(&[1, 1]), wit(1)), InsertOutcome::Inserted);
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.iter().next().unwrap().n_sols(), 2);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut archive = Archive::new();
        archive.insert(cv(&[3, 1]), wit(0));
        archive.insert(cv(&[1, 3]), wit(1));
        archive.insert(cv(&[2, 2]), wit(2));
        let order: Vec<_> = archive.iter().map(|e| e.witness().pm(0)).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn population_dump_round_trips() {
        let mut archive = Archive::new();
        archive.insert(
            CostVec(vec![Cost::new(3, 2), Cost::from_integer(0)]),
            Placement::new(vec![0, 2]),
        );
        archive.insert(
            CostVec(vec![Cost::from_integer(1), Cost::new(1, 3)]),
            Placement::new(vec![1, 1]),
        );
        let mut dump = vec![];
        archive.write_population(&mut dump).unwrap();
        let reloaded = Archive::read_population(dump.as_slice()).unwrap();
        assert_eq!(reloaded.len(), archive.len());
        for (a, b) in archive.iter().zip(reloaded.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn archive_stays_antichain() {
        let mut archive = Archive::new();
        for (a, b, w) in [(5, 5, 0), (4, 6, 1), (3, 3, 2), (6, 2, 3), (2, 4, 4)] {
            archive.insert(cv(&[a, b]), wit(w));
        }
        for x in archive.iter() {
            for y in archive.iter() {
                assert!(!x.costs.dominates(&y.costs));
            }
        }
    }
}
