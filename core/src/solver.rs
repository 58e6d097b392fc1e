//! # Incremental Oracle Facade
//!
//! Wraps a CDCL solver behind the capability set the search algorithms need:
//! monotonically accumulating hard constraints, per-call assumptions,
//! blocking clauses, per-call conflict budgets, and guarded parity (XOR)
//! side constraints. The facade owns the cooperative budget checks: the
//! global deadline and the external interrupt flag are polled before every
//! oracle call.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use anyhow::Context;
use rustsat::{
    clause,
    instances::{BasicVarManager, Cnf, ManageVars},
    solvers::{LimitConflicts, PhaseLit, Solve, SolveIncremental, SolverResult},
    types::{Assignment, Clause, Lit, Var},
};

use crate::termination::{SearchResult, Termination};

/// Result of a budgeted oracle call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveOutcome {
    Sat,
    Unsat,
    /// The conflict budget was consumed before an answer was found
    Budget,
}

/// Handle for interrupting a running search from another thread
#[derive(Clone)]
pub struct Interrupter {
    flag: Arc<AtomicBool>,
}

impl Interrupter {
    /// Interrupts the search asynchronously. The search observes the flag
    /// before its next oracle call.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// The oracle facade. Hard constraints accumulate for the lifetime of the
/// facade; assumptions are cleared per call.
pub struct Facade<O> {
    oracle: O,
    term_flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
    n_calls: usize,
}

impl<O: SolveIncremental> Facade<O> {
    pub fn new(mut oracle: O, max_var: Option<Var>) -> anyhow::Result<Self> {
        if let Some(mv) = max_var {
            oracle.reserve(mv)?;
        }
        Ok(Facade {
            oracle,
            term_flag: Arc::new(AtomicBool::new(false)),
            deadline: None,
            n_calls: 0,
        })
    }

    /// Installs (or clears) the global wall-clock deadline
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            flag: self.term_flag.clone(),
        }
    }

    /// Polls the cancellation signals. Called before every oracle call and
    /// at loop heads of the search algorithms.
    pub fn check_termination(&self) -> SearchResult {
        if self.term_flag.load(Ordering::Relaxed) {
            return Err(Termination::Interrupted);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Termination::Deadline);
            }
        }
        Ok(())
    }

    pub fn add_clause(&mut self, clause: Clause) -> anyhow::Result<()> {
        self.oracle.add_clause(clause).context("oracle rejected clause")
    }

    pub fn add_unit(&mut self, unit: Lit) -> anyhow::Result<()> {
        self.oracle.add_unit(unit).context("oracle rejected unit")
    }

    pub fn add_cnf(&mut self, cnf: Cnf) -> anyhow::Result<()> {
        self.oracle.add_cnf(cnf).context("oracle rejected CNF")
    }

    /// Queries the model of the last satisfiable call, up to `high_var`
    pub fn solution(&self, high_var: Var) -> anyhow::Result<Assignment> {
        self.oracle.solution(high_var).context("cannot read model")
    }

    pub fn n_calls(&self) -> usize {
        self.n_calls
    }

    /// Grants mutable access to the oracle as a clause collector for
    /// incremental objective encodings
    pub fn collector(&mut self) -> &mut O {
        &mut self.oracle
    }
}

impl<O: SolveIncremental + LimitConflicts> Facade<O> {
    /// Solves under assumptions with an optional conflict budget. An
    /// interrupted call with neither the deadline nor the external flag
    /// raised means the budget was consumed.
    pub fn solve_limited(
        &mut self,
        assumps: &[Lit],
        budget: Option<u32>,
    ) -> SearchResult<SolveOutcome> {
        self.check_termination()?;
        if let Some(b) = budget {
            self.oracle
                .limit_conflicts(Some(b))
                .context("cannot set conflict limit")?;
        }
        let res = if assumps.is_empty() {
            self.oracle.solve()
        } else {
            self.oracle.solve_assumps(assumps)
        }
        .context("oracle call failed")?;
        if budget.is_some() {
            self.oracle
                .limit_conflicts(None)
                .context("cannot clear conflict limit")?;
        }
        self.n_calls += 1;
        match res {
            SolverResult::Sat => Ok(SolveOutcome::Sat),
            SolverResult::Unsat => Ok(SolveOutcome::Unsat),
            SolverResult::Interrupted => {
                self.check_termination()?;
                Ok(SolveOutcome::Budget)
            }
        }
    }

    /// Solves under assumptions without a conflict budget; the outcome is
    /// never [`SolveOutcome::Budget`]
    pub fn solve(&mut self, assumps: &[Lit]) -> SearchResult<SolveOutcome> {
        self.solve_limited(assumps, None)
    }
}

impl<O: PhaseLit> Facade<O> {
    /// Phases a full candidate into the oracle as a search hint
    pub fn phase_hint(&mut self, lits: impl IntoIterator<Item = Lit>) -> anyhow::Result<()> {
        for lit in lits {
            self.oracle.phase_lit(lit)?;
        }
        Ok(())
    }

    /// Clears phase hints for all variables up to `max_var`
    pub fn unphase(&mut self, max_var: Var) -> anyhow::Result<()> {
        for idx in 0..=max_var.idx32() {
            self.oracle.unphase_var(Var::new(idx))?;
        }
        Ok(())
    }
}

impl<O: SolveIncremental> Facade<O> {
    /// Adds a parity constraint over the given variables, guarded by a fresh
    /// activation literal. Assuming the returned literal enforces
    /// `⊕ vars = parity`; [`Facade::retire_guard`] disables the constraint
    /// for good. The parity is chain-encoded over fresh auxiliaries.
    pub fn add_xor_guarded(
        &mut self,
        vars: &[Var],
        parity: bool,
        vm: &mut BasicVarManager,
    ) -> anyhow::Result<Lit> {
        let guard = vm.new_var().pos_lit();
        if vars.is_empty() {
            if parity {
                // unsatisfiable slice: empty sum with odd parity
                self.add_clause(clause![!guard])?;
            }
            return Ok(guard);
        }
        let mut running = vars[0].pos_lit();
        for &var in &vars[1..] {
            let next = vm.new_var().pos_lit();
            let a = running;
            let b = var.pos_lit();
            // next ↔ a ⊕ b, active only under the guard
            self.add_clause(clause![!guard, !next, a, b])?;
            self.add_clause(clause![!guard, !next, !a, !b])?;
            self.add_clause(clause![!guard, next, !a, b])?;
            self.add_clause(clause![!guard, next, a, !b])?;
            running = next;
        }
        let constraint = if parity { running } else { !running };
        self.add_clause(clause![!guard, constraint])?;
        Ok(guard)
    }

    /// Permanently disables a guarded constraint
    pub fn retire_guard(&mut self, guard: Lit) -> anyhow::Result<()> {
        self.add_unit(!guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupter_flags_termination() {
        // facade over a trivial oracle is exercised in the integration
        // tests; here only the signal plumbing is checked
        let flag = Arc::new(AtomicBool::new(false));
        let int = Interrupter { flag: flag.clone() };
        int.interrupt();
        assert!(flag.load(Ordering::Relaxed));
    }
}
