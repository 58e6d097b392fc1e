//! # Pareto-MCS Search
//!
//! Enumerates candidate Pareto-optimal placements as minimal correction
//! subsets of the objective soft literals, with optional stratification,
//! partition budget folding, path diversification, and hash-slice
//! diversification. Every witness model is blocked so that future models
//! must improve on at least one paid objective literal.

use rand_pcg::Pcg64;
use rustsat::{
    solvers::{LimitConflicts, SolveIncremental},
    types::{Assignment, Lit},
};

use crate::{
    algs::{hashenum, mcs, salt, substream, Kernel, Step},
    options::{Algorithm, StratStrategy},
    stratify::{stratify, Partition, PartitionQueue},
    termination::SearchResult,
};

/// State of the Pareto-MCS flavours (CLD and LBX)
pub(crate) struct ParetoMcs {
    /// CLD extraction; LBX otherwise
    cld: bool,
    /// Literal order stream for the LBX extractor
    extraction_rng: Pcg64,
    /// Rotation stream for path diversification
    path_rng: Pcg64,
    /// Stream draws for the split stratification strategy
    scheduler_rng: Pcg64,
    /// Hash-slice sampling stream
    hash_rng: Pcg64,
}

impl ParetoMcs {
    pub fn new<O>(kernel: &Kernel<O>) -> Self {
        let seed = kernel.opts.seed;
        ParetoMcs {
            cld: kernel.opts.alg == Algorithm::ParetoCld,
            extraction_rng: substream(seed, salt::EXTRACTION),
            path_rng: substream(seed, salt::PATH_DIV),
            scheduler_rng: substream(seed, salt::SCHEDULER),
            hash_rng: substream(seed, salt::HASH),
        }
    }

    /// The ordered partition supply for one iteration
    fn partition_queue<O>(&mut self, kernel: &Kernel<O>) -> PartitionQueue {
        let opts = &kernel.opts.strat;
        let mut queue = match opts.strategy {
            StratStrategy::Off => PartitionQueue::single(vec![Partition {
                lits: kernel.objs.merged.lits.clone(),
            }]),
            StratStrategy::Merged => PartitionQueue::single(stratify(&kernel.objs.merged, opts)),
            StratStrategy::Split => match &kernel.objs.wastage_den {
                Some(den) => PartitionQueue::split(
                    stratify(&kernel.objs.merged_sans_den, opts),
                    stratify(den, opts),
                ),
                None => PartitionQueue::single(stratify(&kernel.objs.merged_sans_den, opts)),
            },
        };
        if self.cld && kernel.opts.path_diversification {
            queue.rotate(&mut self.path_rng);
        }
        queue
    }

    /// Discovers one more candidate Pareto point
    pub fn step<O>(&mut self, kernel: &mut Kernel<O>) -> SearchResult<Step>
    where
        O: SolveIncremental + LimitConflicts,
    {
        let budget = kernel.opts.strat.part_max_conflicts;
        let mut use_slice = kernel.opts.encode.hash_functions;

        'attempt: loop {
            // optional hash slice for diversification; retired before the
            // iteration ends
            let guards = if use_slice {
                hashenum::sample_slice(kernel, &mut self.hash_rng)?
            } else {
                vec![]
            };
            let mut queue = self.partition_queue(kernel);
            let mut locked: Vec<Lit> = vec![];
            let mut last_model: Option<Assignment> = None;

            while let Some(part) = queue.next(&mut self.scheduler_rng) {
                kernel.stats.n_partitions += 1;
                let softs: Vec<(Lit, usize)> =
                    part.lits.iter().map(|&(l, w)| (!l, w)).collect();
                let base: Vec<Lit> = guards.iter().chain(locked.iter()).copied().collect();
                let outcome = if self.cld {
                    mcs::cld(kernel, &softs, &base, budget)?
                } else {
                    mcs::lbx(kernel, &softs, &base, budget, &mut self.extraction_rng)?
                };
                if outcome.unsat {
                    if !guards.is_empty() {
                        // the slice cut off the remaining space; drop it and
                        // rerun the iteration undiversified
                        hashenum::retire_slice(kernel, guards)?;
                        use_slice = false;
                        continue 'attempt;
                    }
                    if locked.is_empty() {
                        // refuted with no assumptions: the front is exhausted
                        return Ok(Step::Exhausted);
                    }
                    break;
                }
                if outcome.proved {
                    locked.extend(outcome.kept.iter().copied());
                    locked.extend(outcome.correction.iter().map(|&(l, _)| !l));
                } else {
                    // partition not proved optimal: keep what the witness
                    // satisfies and fold the rest into the successor
                    kernel.stats.n_partitions_folded += 1;
                    locked.extend(outcome.kept.iter().copied());
                    queue.fold(outcome.correction.iter().map(|&(l, w)| (!l, w)).collect());
                }
                if outcome.model.is_some() {
                    last_model = outcome.model;
                }
            }

            if !guards.is_empty() {
                hashenum::retire_slice(kernel, guards)?;
            }

            return match last_model {
                Some(model) => {
                    kernel.record_model(&model)?;
                    let block = kernel.pareto_block_clause(&model);
                    kernel.facade.add_clause(block)?;
                    Ok(Step::Continue)
                }
                // conflict budgets starved every partition; the iteration
                // cannot make progress, so the search stops with what the
                // archive holds
                None => Ok(Step::Exhausted),
            };
        }
    }
}
