//! # Smart Mutation and Smart Improvement
//!
//! Constraint-backed services for evolutionary callers: repair an arbitrary
//! candidate placement to feasibility, and optionally drive a feasible
//! candidate towards the front with a short stratified Pareto-CLD run. The
//! service re-enters the driver's kernel through an explicit borrow; the
//! attached logger is silenced for the duration of the call.

use rand::seq::SliceRandom;
use rustsat::{
    solvers::{LimitConflicts, PhaseLit, SolveIncremental},
    types::Lit,
};

use crate::{
    algs::{mcs, Driver},
    options::{SmartOptions, StratOptions, StratStrategy},
    solver::SolveOutcome,
    stratify::{stratify, PartitionQueue},
    termination::SearchResult,
    types::Placement,
};

/// What the smart service did with a candidate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SmartOutcome {
    /// The candidate was infeasible and got repaired
    Repaired(Placement),
    /// The candidate was kept as is (already feasible, or the budget ran
    /// out before a repair was found)
    Unchanged,
    /// A dominating feasible neighbour was found
    Improved(Placement),
    /// No feasible placement exists in the neighbourhood even with full
    /// unfixing; the caller should discard the individual
    Discard,
}

impl<O: SolveIncremental + LimitConflicts + PhaseLit> Driver<O> {
    /// Repairs a candidate placement by fixing its assignments, randomly
    /// unfixing a `relax_rate` fraction, and solving under a conflict
    /// budget. Feasible candidates are returned unchanged unless smart
    /// improvement is enabled.
    pub fn smart_mutation(
        &mut self,
        candidate: &Placement,
        relax_rate: f64,
        opts: &SmartOptions,
    ) -> SearchResult<SmartOutcome> {
        if self.kernel.inst.n_vms() == 0 || candidate.len() != self.kernel.inst.n_vms() {
            return Ok(SmartOutcome::Unchanged);
        }
        // embedded calls run silent
        let logger = self.kernel.logger.take();
        let result = if self.kernel.inst.check(candidate) {
            match &opts.improvement {
                Some(improve) => self.improve(candidate, *improve),
                None => Ok(SmartOutcome::Unchanged),
            }
        } else {
            self.repair(candidate, relax_rate, opts)
        };
        self.kernel.logger = logger;
        result
    }

    /// Randomly selected global VM indices to unfix
    fn pick_unfixed(&mut self, fraction: f64) -> Vec<bool> {
        let n = self.kernel.inst.n_vms();
        let count = ((fraction * n as f64).ceil() as usize).clamp(1, n);
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut self.smart_rng);
        let mut unfixed = vec![false; n];
        for &idx in &indices[..count] {
            unfixed[idx] = true;
        }
        unfixed
    }

    /// Assumptions pinning every fixed VM to its candidate machine
    fn fixing_assumps(&self, candidate: &Placement, unfixed: &[bool]) -> Vec<Lit> {
        let n_pms = self.kernel.inst.n_pms();
        candidate
            .iter()
            .filter(|&(vm, pm)| !unfixed[vm] && pm < n_pms)
            .map(|(vm, pm)| self.kernel.enc.map.x(vm, pm).pos_lit())
            .collect()
    }

    fn repair(
        &mut self,
        candidate: &Placement,
        relax_rate: f64,
        opts: &SmartOptions,
    ) -> SearchResult<SmartOutcome> {
        let mut unfixed = self.pick_unfixed(relax_rate);
        let mut assumps = self.fixing_assumps(candidate, &unfixed);
        let mut domain_tried = false;
        let mut fully_unfixed = false;
        loop {
            match self.kernel.facade.solve_limited(&assumps, opts.max_conflicts)? {
                SolveOutcome::Sat => {
                    let model = self.kernel.model()?;
                    let placement = self.kernel.enc.map.decode(&model)?;
                    return Ok(SmartOutcome::Repaired(placement));
                }
                SolveOutcome::Budget => return Ok(SmartOutcome::Unchanged),
                SolveOutcome::Unsat => {
                    if opts.domain_unfixing && !domain_tried {
                        domain_tried = true;
                        // also unfix every VM implicated in a violated
                        // constraint of the candidate
                        let mut grew = false;
                        for violation in self.kernel.inst.violations(candidate) {
                            for &vm in violation.vms() {
                                if !unfixed[vm] {
                                    unfixed[vm] = true;
                                    grew = true;
                                }
                            }
                        }
                        if grew {
                            assumps = self.fixing_assumps(candidate, &unfixed);
                            continue;
                        }
                    }
                    if !fully_unfixed {
                        fully_unfixed = true;
                        assumps.clear();
                        continue;
                    }
                    return Ok(SmartOutcome::Discard);
                }
            }
        }
    }

    /// Short stratified Pareto-CLD over the neighbourhood of a feasible
    /// candidate, seeded with the candidate as a phase hint
    fn improve(
        &mut self,
        candidate: &Placement,
        opts: crate::options::ImproveOptions,
    ) -> SearchResult<SmartOutcome> {
        let unfixed = self.pick_unfixed(opts.relax_rate);
        let mut locked = self.fixing_assumps(candidate, &unfixed);
        let hint = self.kernel.enc.map.placement_lits(candidate);
        self.kernel.facade.phase_hint(hint)?;

        let strat = StratOptions {
            strategy: StratStrategy::Merged,
            lit_weight_ratio: opts.lit_weight_ratio,
            partition_number: None,
            part_max_conflicts: Some(opts.part_max_conflicts),
        };
        let mut queue = PartitionQueue::single(stratify(&self.kernel.objs.merged, &strat));
        let mut remaining = opts.max_conflicts;
        let mut last_model = None;
        while let Some(part) = queue.next(&mut self.smart_rng) {
            let budget = match remaining {
                Some(0) => break,
                Some(left) => {
                    let call = left.min(opts.part_max_conflicts);
                    remaining = Some(left - call);
                    Some(call)
                }
                None => Some(opts.part_max_conflicts),
            };
            let softs: Vec<(Lit, usize)> = part.lits.iter().map(|&(l, w)| (!l, w)).collect();
            let outcome = mcs::cld(&mut self.kernel, &softs, &locked, budget)?;
            if outcome.unsat {
                break;
            }
            locked.extend(outcome.kept.iter().copied());
            if outcome.proved {
                locked.extend(outcome.correction.iter().map(|&(l, _)| !l));
            } else {
                queue.fold(outcome.correction.iter().map(|&(l, w)| (!l, w)).collect());
            }
            if outcome.model.is_some() {
                last_model = outcome.model;
            }
        }

        if let Some(max_var) = self.kernel.enc.max_base_var() {
            self.kernel.facade.unphase(max_var)?;
        }

        let Some(model) = last_model else {
            return Ok(SmartOutcome::Unchanged);
        };
        let placement = self.kernel.enc.map.decode(&model)?;
        let ignore_den = self.kernel.opts.ignore_den_eval;
        let new_costs = self.kernel.inst.evaluate(&placement, ignore_den);
        let old_costs = self.kernel.inst.evaluate(candidate, ignore_den);
        if new_costs.dominates(&old_costs) {
            Ok(SmartOutcome::Improved(placement))
        } else {
            Ok(SmartOutcome::Unchanged)
        }
    }
}
