//! # Hash-Based Model Enumeration
//!
//! Slices the solution space with random parity constraints of expected
//! density 1/2 over the placement variables, enumerates models inside the
//! slice, then retires the slice and samples a fresh one. The models are
//! statistically diverse and augment the archive.

use rand::Rng;
use rand_pcg::Pcg64;
use rustsat::{
    solvers::{LimitConflicts, SolveIncremental},
    types::{Lit, Var},
};

use crate::{
    algs::{placement_blocking_clause, salt, substream, Kernel, Step},
    solver::SolveOutcome,
    termination::SearchResult,
};

/// Samples one hash slice: a batch of guarded parity constraints over the
/// placement variables. Returns the activation literals to assume.
pub(crate) fn sample_slice<O>(
    kernel: &mut Kernel<O>,
    rng: &mut Pcg64,
) -> anyhow::Result<Vec<Lit>>
where
    O: SolveIncremental,
{
    let n_x = kernel.enc.map.x_vars().count();
    let count = kernel
        .opts
        .hashes_per_slice
        .unwrap_or_else(|| (usize::BITS - n_x.leading_zeros()) as usize / 2)
        .max(1);
    let mut guards = Vec::with_capacity(count);
    for _ in 0..count {
        let vars: Vec<Var> = kernel
            .enc
            .map
            .x_vars()
            .filter(|_| rng.gen_bool(0.5))
            .collect();
        let parity = rng.gen_bool(0.5);
        let guard = kernel
            .facade
            .add_xor_guarded(&vars, parity, &mut kernel.var_manager)?;
        guards.push(guard);
    }
    Ok(guards)
}

/// Permanently disables a hash slice
pub(crate) fn retire_slice<O>(kernel: &mut Kernel<O>, guards: Vec<Lit>) -> anyhow::Result<()>
where
    O: SolveIncremental,
{
    for guard in guards {
        kernel.facade.retire_guard(guard)?;
    }
    Ok(())
}

/// State of the hash-based enumeration algorithm
pub(crate) struct HashEnum {
    hash_rng: Pcg64,
}

impl HashEnum {
    pub fn new<O>(kernel: &Kernel<O>) -> Self {
        HashEnum {
            hash_rng: substream(kernel.opts.seed, salt::HASH),
        }
    }

    /// Enumerates the models of one fresh hash slice. Without hash
    /// functions this degrades to plain model enumeration.
    pub fn step<O>(&mut self, kernel: &mut Kernel<O>) -> SearchResult<Step>
    where
        O: SolveIncremental + LimitConflicts,
    {
        // enumeration is complete once the unsliced formula is refuted
        if kernel.facade.solve(&[])? == SolveOutcome::Unsat {
            return Ok(Step::Exhausted);
        }
        let guards = if kernel.opts.encode.hash_functions {
            kernel.stats.n_hash_rounds += 1;
            sample_slice(kernel, &mut self.hash_rng)?
        } else {
            vec![]
        };
        let mut found = 0;
        while found < kernel.opts.models_per_slice {
            match kernel.facade.solve(&guards)? {
                SolveOutcome::Sat => {
                    let model = kernel.model()?;
                    kernel.record_model(&model)?;
                    let block = placement_blocking_clause(&model, &kernel.enc);
                    kernel.facade.add_clause(block)?;
                    found += 1;
                }
                SolveOutcome::Unsat => break,
                SolveOutcome::Budget => unreachable!("no budget was set"),
            }
        }
        retire_slice(kernel, guards)?;
        Ok(Step::Continue)
    }
}
