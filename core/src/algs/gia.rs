//! # Guided Improvement Algorithm
//!
//! Starts from any feasible model and tightens the objectives
//! lexicographically: each round asks for a model that weakly dominates the
//! incumbent and strictly improves one dimension. When no dimension can
//! improve, the incumbent is a Pareto-optimal point; its dominating cone is
//! blocked and the outer loop restarts.

use rand_pcg::Pcg64;
use rustsat::{
    encodings::CollectClauses,
    solvers::{LimitConflicts, SolveIncremental},
};

use crate::{
    algs::{hashenum, is_zero_cost, salt, substream, Kernel, Step},
    objective::ObjEncoding,
    solver::SolveOutcome,
    termination::SearchResult,
    Phase,
};

/// State of the guided improvement algorithm
pub(crate) struct Gia {
    /// Upper-bound encodings of the tightening objectives, in reported order
    encs: Vec<ObjEncoding>,
    hash_rng: Pcg64,
}

impl Gia {
    pub fn new<O>(kernel: &Kernel<O>) -> Self {
        Gia {
            encs: kernel
                .objs
                .tightening()
                .into_iter()
                .map(ObjEncoding::new)
                .collect(),
            hash_rng: substream(kernel.opts.seed, salt::HASH),
        }
    }

    /// Finds and blocks one Pareto-optimal point
    pub fn step<O>(&mut self, kernel: &mut Kernel<O>) -> SearchResult<Step>
    where
        O: SolveIncremental + LimitConflicts + CollectClauses,
    {
        // starting model, hash-diversified when enabled
        let mut guards = if kernel.opts.encode.hash_functions {
            hashenum::sample_slice(kernel, &mut self.hash_rng)?
        } else {
            vec![]
        };
        let mut model = match kernel.facade.solve(&guards)? {
            SolveOutcome::Sat => kernel.model()?,
            SolveOutcome::Unsat => {
                if guards.is_empty() {
                    return Ok(Step::Exhausted);
                }
                // empty slice; fall back to the undiversified space
                hashenum::retire_slice(kernel, std::mem::take(&mut guards))?;
                match kernel.facade.solve(&[])? {
                    SolveOutcome::Sat => kernel.model()?,
                    SolveOutcome::Unsat => return Ok(Step::Exhausted),
                    SolveOutcome::Budget => unreachable!("no budget was set"),
                }
            }
            SolveOutcome::Budget => unreachable!("no budget was set"),
        };
        let mut costs = kernel.internal_costs(&model);

        // tighten lexicographically until no objective can improve
        'improve: loop {
            for obj_idx in 0..self.encs.len() {
                if costs[obj_idx] == 0 {
                    continue;
                }
                let mut bounds = costs.clone();
                bounds[obj_idx] -= 1;
                let mut assumps = kernel.enforce_dominating(&bounds, &mut self.encs)?;
                assumps.extend(guards.iter().copied());
                match kernel.facade.solve(&assumps)? {
                    SolveOutcome::Sat => {
                        model = kernel.model()?;
                        costs = kernel.internal_costs(&model);
                        let reference =
                            kernel.inst.evaluate(
                                &kernel.enc.map.decode(&model)?,
                                kernel.opts.ignore_den_eval,
                            );
                        kernel.log_candidate(&reference, Phase::Minimization)?;
                        continue 'improve;
                    }
                    SolveOutcome::Unsat => (),
                    SolveOutcome::Budget => unreachable!("no budget was set"),
                }
            }
            break;
        }

        kernel.record_model(&model)?;
        // block the dominating cone of the emitted point
        let block = kernel.dominated_block_clause(&costs, &mut self.encs)?;
        kernel.facade.add_clause(block)?;
        if !guards.is_empty() {
            hashenum::retire_slice(kernel, guards)?;
        }
        if is_zero_cost(&costs) {
            // nothing can beat the all-zero point
            return Ok(Step::Exhausted);
        }
        Ok(Step::Continue)
    }
}
