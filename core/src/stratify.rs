//! # Objective Stratification
//!
//! Partitions a weighted objective into ordered buckets solved in sequence,
//! highest weight first. Partition boundaries follow either the
//! literal-to-distinct-weight ratio or a fixed partition count, and divided
//! objectives are scheduled by the merged or split strategy.

use std::collections::VecDeque;

use rand::Rng;
use rand_pcg::Pcg64;
use rustsat::types::Lit;

use crate::{objective::WeightedObjective, options::StratOptions};

/// One ordered bucket of objective literals with their weights
#[derive(Clone, Debug, Default)]
pub struct Partition {
    pub lits: Vec<(Lit, usize)>,
}

impl Partition {
    pub fn weight(&self) -> usize {
        self.lits.iter().map(|&(_, w)| w).sum()
    }

    pub fn len(&self) -> usize {
        self.lits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lits.is_empty()
    }
}

/// Splits one objective into ordered partitions according to the stratifier
/// parameters. The first partition carries the highest weights.
pub fn stratify(obj: &WeightedObjective, opts: &StratOptions) -> Vec<Partition> {
    let mut lits: Vec<(Lit, usize)> = obj.lits.clone();
    // deterministic order: descending weight, ties by literal index
    lits.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    if lits.is_empty() {
        return vec![];
    }
    match opts.partition_number {
        Some(n) => fixed_split(lits, n),
        None => ratio_split(lits, opts.lit_weight_ratio),
    }
}

/// Walks weight classes in descending order and closes a partition whenever
/// the literal count reaches `ratio` times the number of distinct weights in
/// it. Weight-class boundaries are never split.
fn ratio_split(lits: Vec<(Lit, usize)>, ratio: f64) -> Vec<Partition> {
    let mut partitions = vec![];
    let mut current = Partition::default();
    let mut distinct = 0usize;
    let mut last_weight = None;
    for (lit, weight) in lits {
        if last_weight != Some(weight) {
            // class boundary: check whether the previous classes filled the
            // partition
            if distinct > 0 && current.len() as f64 / distinct as f64 >= ratio {
                partitions.push(std::mem::take(&mut current));
                distinct = 0;
            }
            distinct += 1;
            last_weight = Some(weight);
        }
        current.lits.push((lit, weight));
    }
    if !current.is_empty() {
        partitions.push(current);
    }
    partitions
}

/// Quantile-splits the weight-sorted literal list into `n` partitions of
/// near-equal cumulative weight
fn fixed_split(lits: Vec<(Lit, usize)>, n: usize) -> Vec<Partition> {
    let n = n.max(1);
    let total: usize = lits.iter().map(|&(_, w)| w).sum();
    let target = total.div_ceil(n);
    let mut partitions = vec![];
    let mut current = Partition::default();
    let mut cum = 0usize;
    for (lit, weight) in lits {
        current.lits.push((lit, weight));
        cum += weight;
        if cum >= target && partitions.len() + 1 < n {
            partitions.push(std::mem::take(&mut current));
            cum = 0;
        }
    }
    if !current.is_empty() {
        partitions.push(current);
    }
    partitions
}

/// Ordered supply of partitions for one search iteration. With the split
/// strategy, two independent streams compete; the next partition comes from
/// whichever stream wins a draw weighted by remaining weight.
#[derive(Clone, Debug)]
pub struct PartitionQueue {
    streams: Vec<VecDeque<Partition>>,
    last: usize,
}

impl PartitionQueue {
    /// A queue over one ordered partition list (merged strategy, or
    /// stratification over a single objective)
    pub fn single(parts: Vec<Partition>) -> Self {
        PartitionQueue {
            streams: vec![parts.into()],
            last: 0,
        }
    }

    /// A queue alternating probabilistically between two partition lists
    pub fn split(first: Vec<Partition>, second: Vec<Partition>) -> Self {
        PartitionQueue {
            streams: vec![first.into(), second.into()],
            last: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.streams.iter().all(|s| s.is_empty())
    }

    fn remaining_weight(&self, stream: usize) -> usize {
        self.streams[stream].iter().map(Partition::weight).sum()
    }

    /// Pops the next partition. With two live streams the choice is random
    /// with probability proportional to the remaining weight sums.
    pub fn next(&mut self, rng: &mut Pcg64) -> Option<Partition> {
        let live: Vec<usize> = (0..self.streams.len())
            .filter(|&idx| !self.streams[idx].is_empty())
            .collect();
        let chosen = match live.len() {
            0 => return None,
            1 => live[0],
            _ => {
                let weights: Vec<usize> =
                    live.iter().map(|&idx| self.remaining_weight(idx)).collect();
                let total: usize = weights.iter().sum();
                if total == 0 {
                    live[0]
                } else {
                    let draw = rng.gen_range(0..total);
                    let mut acc = 0;
                    let mut pick = live[0];
                    for (&idx, &w) in live.iter().zip(&weights) {
                        acc += w;
                        if draw < acc {
                            pick = idx;
                            break;
                        }
                    }
                    pick
                }
            }
        };
        self.last = chosen;
        self.streams[chosen].pop_front()
    }

    /// Rotates the literal ordering inside every pending partition. This is
    /// the path diversification perturbation between search iterations.
    pub fn rotate(&mut self, rng: &mut Pcg64) {
        for stream in &mut self.streams {
            for part in stream.iter_mut() {
                if part.lits.len() > 1 {
                    let k = rng.gen_range(0..part.lits.len());
                    part.lits.rotate_left(k);
                }
            }
        }
    }

    /// Folds the leftovers of a partition that was not proved optimal into
    /// its successor, which re-solves them. Leftovers of a final partition
    /// have no successor and stay unproved.
    pub fn fold(&mut self, leftovers: Vec<(Lit, usize)>) {
        if leftovers.is_empty() {
            return;
        }
        let stream = if !self.streams[self.last].is_empty() {
            self.last
        } else if let Some(other) = (0..self.streams.len()).find(|&idx| !self.streams[idx].is_empty())
        {
            other
        } else {
            return;
        };
        let front = self.streams[stream].front_mut().expect("stream checked nonempty");
        front.lits.splice(0..0, leftovers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::{ObjKind, RationalObjective};
    use num_rational::Rational64;
    use rand::SeedableRng;
    use rustsat::lit;

    fn weighted(weights: &[usize]) -> WeightedObjective {
        let mut obj = RationalObjective::new(ObjKind::Merged);
        for (idx, &w) in weights.iter().enumerate() {
            obj.add_term(lit![idx as u32], Rational64::from_integer(w as i64));
        }
        obj.reduce().unwrap()
    }

    #[test]
    fn ratio_split_respects_weight_classes() {
        // two literals of weight 8, four of weight 2, two of weight 1
        let obj = weighted(&[8, 8, 2, 2, 2, 2, 1, 1]);
        let parts = stratify(
            &obj,
            &StratOptions {
                lit_weight_ratio: 2.0,
                ..StratOptions::default()
            },
        );
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 2);
        assert!(parts[0].lits.iter().all(|&(_, w)| w == 8));
        assert_eq!(parts[1].len(), 4);
        assert_eq!(parts[2].len(), 2);
    }

    #[test]
    fn high_ratio_keeps_everything_together() {
        let obj = weighted(&[5, 4, 3, 2, 1]);
        let parts = stratify(&obj, &StratOptions::default());
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len(), 5);
    }

    #[test]
    fn partitions_are_ordered_by_weight() {
        let obj = weighted(&[1, 100, 10, 100, 1]);
        let parts = stratify(
            &obj,
            &StratOptions {
                lit_weight_ratio: 1.0,
                ..StratOptions::default()
            },
        );
        let firsts: Vec<usize> = parts.iter().map(|p| p.lits[0].1).collect();
        let mut sorted = firsts.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(firsts, sorted);
    }

    #[test]
    fn fixed_split_balances_cumulative_weight() {
        let obj = weighted(&[4, 4, 4, 4, 4, 4]);
        let parts = stratify(
            &obj,
            &StratOptions {
                partition_number: Some(3),
                ..StratOptions::default()
            },
        );
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.weight() == 8));
    }

    #[test]
    fn queue_folds_unproved_leftovers_forward() {
        let mut rng = Pcg64::seed_from_u64(0);
        let mut queue = PartitionQueue::single(vec![
            Partition {
                lits: vec![(lit![0], 10)],
            },
            Partition {
                lits: vec![(lit![1], 1)],
            },
        ]);
        let first = queue.next(&mut rng).unwrap();
        queue.fold(first.lits);
        let second = queue.next(&mut rng).unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second.lits[0].0, lit![0]);
        assert!(queue.next(&mut rng).is_none());
    }

    #[test]
    fn split_queue_drains_both_streams() {
        let mut rng = Pcg64::seed_from_u64(7);
        let mut queue = PartitionQueue::split(
            vec![Partition {
                lits: vec![(lit![0], 5)],
            }],
            vec![Partition {
                lits: vec![(lit![1], 5)],
            }],
        );
        let mut seen = vec![];
        while let Some(part) = queue.next(&mut rng) {
            seen.extend(part.lits.iter().map(|&(l, _)| l));
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![lit![0], lit![1]]);
    }
}
