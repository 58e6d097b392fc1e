//! # Correction-Subset Extraction
//!
//! The CLD and LBX procedures over a set of soft unit literals. Soft
//! literals carry the polarity that decreases the objective; a correction
//! subset is a set of softs that must be falsified to restore
//! satisfiability. CLD grows the satisfied set through disjunction
//! assumptions and yields a correction subset that cannot be shrunk; LBX
//! probes one literal at a time with far fewer oracle calls, at the price of
//! minimality only (not minimum cost).

use rand::seq::SliceRandom;
use rand_pcg::Pcg64;
use rustsat::{
    clause,
    instances::ManageVars,
    solvers::{LimitConflicts, SolveIncremental},
    types::{Assignment, Lit, TernaryVal},
};

use crate::{
    algs::Kernel,
    solver::SolveOutcome,
    termination::SearchResult,
};

/// Result of one correction-subset extraction
pub(crate) struct McsOutcome {
    /// Witness model satisfying the kept softs and falsifying the correction
    /// set; `None` only when the base assumptions are unsatisfiable or the
    /// budget ran out before any model was found
    pub model: Option<Assignment>,
    /// Satisfied soft literals
    pub kept: Vec<Lit>,
    /// Falsified soft literals with their weights
    pub correction: Vec<(Lit, usize)>,
    /// Whether the correction set was proved (CLD: no satisfiable superset
    /// of the kept set exists; LBX: inclusion-minimal). Budget exhaustion
    /// clears this and leaves the correction set an upper bound.
    pub proved: bool,
    /// The base assumptions themselves are unsatisfiable
    pub unsat: bool,
}

impl McsOutcome {
    /// Internal cost of the correction set
    pub fn cost(&self) -> usize {
        self.correction.iter().map(|&(_, w)| w).sum()
    }

    fn base_unsat() -> Self {
        McsOutcome {
            model: None,
            kept: vec![],
            correction: vec![],
            proved: true,
            unsat: true,
        }
    }
}

fn split_softs(softs: &[(Lit, usize)], model: &Assignment) -> (Vec<Lit>, Vec<(Lit, usize)>) {
    let mut kept = vec![];
    let mut falsified = vec![];
    for &(l, w) in softs {
        if model.lit_value(l) == TernaryVal::True {
            kept.push(l);
        } else {
            falsified.push((l, w));
        }
    }
    (kept, falsified)
}

/// CLD extraction: repeatedly ask for a model satisfying the kept softs and
/// at least one more, until the residual set is proved to be a correction
/// subset
pub(crate) fn cld<O>(
    kernel: &mut Kernel<O>,
    softs: &[(Lit, usize)],
    base: &[Lit],
    budget: Option<u32>,
) -> SearchResult<McsOutcome>
where
    O: SolveIncremental + LimitConflicts,
{
    // try to satisfy every soft at once
    let mut assumps: Vec<Lit> = base.to_vec();
    assumps.extend(softs.iter().map(|&(l, _)| l));
    let mut model = None;
    let (mut kept, mut correction) = match kernel.facade.solve_limited(&assumps, budget)? {
        SolveOutcome::Sat => {
            let sol = kernel.model()?;
            let split = split_softs(softs, &sol);
            debug_assert!(split.1.is_empty());
            return Ok(McsOutcome {
                model: Some(sol),
                kept: split.0,
                correction: split.1,
                proved: true,
                unsat: false,
            });
        }
        SolveOutcome::Unsat | SolveOutcome::Budget => (vec![], softs.to_vec()),
    };

    let proved = loop {
        if correction.is_empty() {
            break true;
        }
        // demand one more satisfied soft through a guarded disjunction
        let guard = kernel.var_manager.new_var().pos_lit();
        let mut disjunction = clause![!guard];
        for &(l, _) in &correction {
            disjunction.add(l);
        }
        kernel.facade.add_clause(disjunction)?;
        assumps.clear();
        assumps.extend_from_slice(base);
        assumps.extend(kept.iter().copied());
        assumps.push(guard);
        let res = kernel.facade.solve_limited(&assumps, budget)?;
        kernel.facade.retire_guard(guard)?;
        match res {
            SolveOutcome::Sat => {
                let sol = kernel.model()?;
                (kept, correction) = split_softs(softs, &sol);
                model = Some(sol);
            }
            SolveOutcome::Unsat => break true,
            SolveOutcome::Budget => break false,
        }
    };

    if model.is_none() {
        // no model satisfied any soft; fetch a witness for the base set
        match kernel.facade.solve_limited(base, budget)? {
            SolveOutcome::Sat => model = Some(kernel.model()?),
            SolveOutcome::Unsat => return Ok(McsOutcome::base_unsat()),
            SolveOutcome::Budget => {
                return Ok(McsOutcome {
                    model: None,
                    kept,
                    correction,
                    proved: false,
                    unsat: false,
                })
            }
        }
    }
    Ok(McsOutcome {
        model,
        kept,
        correction,
        proved,
        unsat: false,
    })
}

/// LBX extraction: probe the falsified softs one at a time in a randomized
/// order, harvesting every soft the refreshed model satisfies along the way
pub(crate) fn lbx<O>(
    kernel: &mut Kernel<O>,
    softs: &[(Lit, usize)],
    base: &[Lit],
    budget: Option<u32>,
    rng: &mut Pcg64,
) -> SearchResult<McsOutcome>
where
    O: SolveIncremental + LimitConflicts,
{
    let (mut model, mut kept, mut undecided) =
        match kernel.facade.solve_limited(base, budget)? {
            SolveOutcome::Sat => {
                let sol = kernel.model()?;
                let (kept, undecided) = split_softs(softs, &sol);
                (sol, kept, undecided)
            }
            SolveOutcome::Unsat => return Ok(McsOutcome::base_unsat()),
            SolveOutcome::Budget => {
                return Ok(McsOutcome {
                    model: None,
                    kept: vec![],
                    correction: softs.to_vec(),
                    proved: false,
                    unsat: false,
                })
            }
        };
    undecided.shuffle(rng);

    let mut correction = vec![];
    let mut proved = true;
    while let Some((lit, weight)) = undecided.pop() {
        let mut assumps: Vec<Lit> = base.to_vec();
        assumps.extend(kept.iter().copied());
        assumps.push(lit);
        match kernel.facade.solve_limited(&assumps, budget)? {
            SolveOutcome::Sat => {
                model = kernel.model()?;
                kept.push(lit);
                // harvest everything else the new model satisfies
                undecided.retain(|&(l, _)| {
                    if model.lit_value(l) == TernaryVal::True {
                        kept.push(l);
                        false
                    } else {
                        true
                    }
                });
            }
            SolveOutcome::Unsat => correction.push((lit, weight)),
            SolveOutcome::Budget => {
                correction.push((lit, weight));
                correction.append(&mut undecided);
                proved = false;
                break;
            }
        }
    }
    Ok(McsOutcome {
        model: Some(model),
        kept,
        correction,
        proved,
        unsat: false,
    })
}
