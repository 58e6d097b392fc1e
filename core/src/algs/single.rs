//! # Single-Objective Modes
//!
//! The merged-objective modes: linear SAT-UNSAT descent, lexicographic
//! pseudo-Boolean optimization, and correction-subset minimization. They
//! share the kernel with the Pareto flavours but optimize weighted sums
//! instead of enumerating the front.

use rand_pcg::Pcg64;
use rustsat::{
    encodings::CollectClauses,
    solvers::{LimitConflicts, SolveIncremental},
    types::Lit,
};

use crate::{
    algs::{hashenum, mcs, salt, substream, Kernel, Step},
    objective::{ObjEncoding, WeightedObjective},
    options::Algorithm,
    solver::SolveOutcome,
    termination::SearchResult,
    Phase,
};

/// State of the single-objective modes
pub(crate) struct SingleObj {
    mode: Algorithm,
    /// Owned copy of the merged objective
    merged: WeightedObjective,
    merged_enc: ObjEncoding,
    /// Owned copies of the tightening objectives for the lexicographic mode
    tighten: Vec<WeightedObjective>,
    tighten_encs: Vec<ObjEncoding>,
    hash_rng: Pcg64,
}

impl SingleObj {
    pub fn new<O>(kernel: &Kernel<O>) -> Self {
        let merged = kernel.objs.merged.clone();
        let merged_enc = ObjEncoding::new(&merged);
        let tighten: Vec<WeightedObjective> =
            kernel.objs.tightening().into_iter().cloned().collect();
        let tighten_encs = tighten.iter().map(ObjEncoding::new).collect();
        SingleObj {
            mode: kernel.opts.alg,
            merged,
            merged_enc,
            tighten,
            tighten_encs,
            hash_rng: substream(kernel.opts.seed, salt::HASH),
        }
    }

    pub fn step<O>(&mut self, kernel: &mut Kernel<O>) -> SearchResult<Step>
    where
        O: SolveIncremental + LimitConflicts + CollectClauses,
    {
        match self.mode {
            Algorithm::LinearSearch => self.linear_search(kernel),
            Algorithm::Pbo => self.lexicographic(kernel),
            Algorithm::Mcs => self.mcs_round(kernel),
            _ => unreachable!("not a single-objective mode"),
        }
    }

    /// Linear SAT-UNSAT descent on the merged objective. Runs to the proved
    /// optimum in one step.
    fn linear_search<O>(&mut self, kernel: &mut Kernel<O>) -> SearchResult<Step>
    where
        O: SolveIncremental + LimitConflicts + CollectClauses,
    {
        if kernel.facade.solve(&[])? == SolveOutcome::Unsat {
            return Ok(Step::Exhausted);
        }
        let mut model = kernel.model()?;
        kernel.record_model(&model)?;
        let mut cost = self.merged.cost(&model);
        while cost > 0 {
            self.merged_enc.encode_ub_change(
                cost - 1..cost,
                kernel.facade.collector(),
                &mut kernel.var_manager,
            )?;
            let assumps = self.merged_enc.enforce_ub(cost - 1)?;
            match kernel.facade.solve(&assumps)? {
                SolveOutcome::Sat => {
                    model = kernel.model()?;
                    let new_cost = self.merged.cost(&model);
                    debug_assert!(new_cost < cost);
                    cost = new_cost;
                    kernel.record_model(&model)?;
                    let reference = kernel.inst.evaluate(
                        &kernel.enc.map.decode(&model)?,
                        kernel.opts.ignore_den_eval,
                    );
                    kernel.log_candidate(&reference, Phase::Minimization)?;
                }
                SolveOutcome::Unsat => break,
                SolveOutcome::Budget => unreachable!("no budget was set"),
            }
        }
        Ok(Step::Exhausted)
    }

    /// Lexicographic optimization: minimize each objective in reported
    /// order, locking every optimum before descending the next
    fn lexicographic<O>(&mut self, kernel: &mut Kernel<O>) -> SearchResult<Step>
    where
        O: SolveIncremental + LimitConflicts + CollectClauses,
    {
        if kernel.facade.solve(&[])? == SolveOutcome::Unsat {
            return Ok(Step::Exhausted);
        }
        let mut model = kernel.model()?;
        let mut base: Vec<Lit> = vec![];
        for obj_idx in 0..self.tighten.len() {
            let obj = &self.tighten[obj_idx];
            let enc = &mut self.tighten_encs[obj_idx];
            let mut cost = obj.cost(&model);
            while cost > 0 {
                enc.encode_ub_change(
                    cost - 1..cost,
                    kernel.facade.collector(),
                    &mut kernel.var_manager,
                )?;
                let mut assumps = base.clone();
                assumps.extend(enc.enforce_ub(cost - 1)?);
                match kernel.facade.solve(&assumps)? {
                    SolveOutcome::Sat => {
                        model = kernel.model()?;
                        cost = obj.cost(&model);
                    }
                    SolveOutcome::Unsat => break,
                    SolveOutcome::Budget => unreachable!("no budget was set"),
                }
            }
            // lock the proved optimum for the subsequent objectives
            enc.encode_ub_change(
                cost..cost + 1,
                kernel.facade.collector(),
                &mut kernel.var_manager,
            )?;
            base.extend(enc.enforce_ub(cost)?);
        }
        kernel.record_model(&model)?;
        Ok(Step::Exhausted)
    }

    /// One correction-subset round on the merged objective: extract, record
    /// the witness, and demand that future models recover at least one
    /// falsified soft
    fn mcs_round<O>(&mut self, kernel: &mut Kernel<O>) -> SearchResult<Step>
    where
        O: SolveIncremental + LimitConflicts + CollectClauses,
    {
        let mut use_slice = kernel.opts.encode.hash_functions;
        loop {
            let guards = if use_slice {
                hashenum::sample_slice(kernel, &mut self.hash_rng)?
            } else {
                vec![]
            };
            let softs: Vec<(Lit, usize)> = self.merged.soft_lits().collect();
            let outcome = mcs::cld(kernel, &softs, &guards, None)?;
            if outcome.unsat {
                if guards.is_empty() {
                    return Ok(Step::Exhausted);
                }
                hashenum::retire_slice(kernel, guards)?;
                use_slice = false;
                continue;
            }
            if !guards.is_empty() {
                hashenum::retire_slice(kernel, guards)?;
            }
            let model = match &outcome.model {
                Some(model) => model.clone(),
                None => return Ok(Step::Exhausted),
            };
            kernel.record_model(&model)?;
            if outcome.correction.is_empty() {
                // a zero-cost correction subset is the global optimum
                return Ok(Step::Exhausted);
            }
            // at least one falsified soft must flip in future models
            let mut block = rustsat::types::Clause::new();
            for &(l, _) in &outcome.correction {
                block.add(l);
            }
            kernel.facade.add_clause(block)?;
            return Ok(Step::Continue);
        }
    }
}
