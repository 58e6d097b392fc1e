//! # Search Algorithms
//!
//! The shared kernel and the driver dispatching between the algorithm
//! flavours. All flavours operate on the same state: the oracle facade with
//! the encoded hard constraints, the reduced integer objectives, and the
//! non-dominated archive. They differ only in their step function, modelled
//! as a tagged choice.

use rand::SeedableRng;
use rand_pcg::Pcg64;
use rustsat::{
    encodings::CollectClauses,
    instances::{BasicVarManager, ManageVars},
    solvers::{LimitConflicts, PhaseLit, SolveIncremental},
    types::{Assignment, Clause, Lit, TernaryVal},
};
use std::time::Instant;

use crate::{
    archive::{Archive, InsertOutcome},
    encode::{encode, Encoding},
    instance::Instance,
    objective::{ObjEncoding, RationalObjective, WeightedObjective},
    options::{Algorithm, SearchOptions},
    solver::{Facade, Interrupter},
    termination::{SearchResult, Termination},
    types::CostVec,
    Error, Phase, Stats, WriteSolverLog,
};

pub(crate) mod gia;
pub(crate) mod hashenum;
pub(crate) mod mcs;
pub(crate) mod paretomcs;
pub(crate) mod single;

use gia::Gia;
use hashenum::HashEnum;
use paretomcs::ParetoMcs;
use single::SingleObj;

/// Salts for deriving per-component random sub-streams from the base seed
mod salt {
    pub const SCHEDULER: u64 = 1;
    pub const EXTRACTION: u64 = 2;
    pub const PATH_DIV: u64 = 3;
    pub const HASH: u64 = 4;
    pub const SMART: u64 = 5;
}

/// Derives a deterministic per-component generator from the base seed
pub(crate) fn substream(seed: u64, salt: u64) -> Pcg64 {
    Pcg64::seed_from_u64(seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// The reduced integer objectives of one search
pub(crate) struct SearchObjectives {
    pub energy: WeightedObjective,
    pub wastage_num: WeightedObjective,
    pub wastage_den: Option<WeightedObjective>,
    pub migration: Option<WeightedObjective>,
    /// All objectives combined on a common denominator; the soft-literal
    /// pool of the Pareto-MCS algorithms and the single-objective modes
    pub merged: WeightedObjective,
    /// Everything except the denominator, for the split strategy
    pub merged_sans_den: WeightedObjective,
}

impl SearchObjectives {
    fn build(enc: &Encoding) -> Result<Self, Error> {
        let energy = enc.energy.reduce()?;
        let wastage_num = enc.wastage_num.reduce()?;
        let wastage_den = enc.wastage_den.as_ref().map(|o| o.reduce()).transpose()?;
        let migration = enc.migration.as_ref().map(|o| o.reduce()).transpose()?;
        let merged = RationalObjective::merged(enc.objectives()).reduce()?;
        let mut sans_den: Vec<&RationalObjective> = vec![&enc.energy, &enc.wastage_num];
        if let Some(mig) = &enc.migration {
            sans_den.push(mig);
        }
        let merged_sans_den = RationalObjective::merged(sans_den).reduce()?;
        Ok(SearchObjectives {
            energy,
            wastage_num,
            wastage_den,
            migration,
            merged,
            merged_sans_den,
        })
    }

    /// The objectives the bound-tightening algorithms work on, in reported
    /// order
    pub fn tightening(&self) -> Vec<&WeightedObjective> {
        let mut objs = vec![&self.energy, &self.wastage_num];
        if let Some(mig) = &self.migration {
            objs.push(mig);
        }
        objs
    }
}

/// State shared between all algorithm flavours
pub(crate) struct Kernel<O> {
    pub facade: Facade<O>,
    pub inst: Instance,
    pub enc: Encoding,
    pub objs: SearchObjectives,
    /// Variable manager positioned after the CNF conversion; extended by
    /// objective encodings and hash constraints
    pub var_manager: BasicVarManager,
    pub opts: SearchOptions,
    pub archive: Archive,
    pub stats: Stats,
    pub logger: Option<Box<dyn WriteSolverLog>>,
}

impl<O: SolveIncremental> Kernel<O> {
    fn new(mut inst: Instance, opts: SearchOptions, oracle: O) -> Result<Self, Error> {
        // keep the evaluation side consistent with the encoded relaxations
        if opts.encode.ignore_platform {
            inst.discard_platform_constraints();
        }
        if opts.encode.ignore_anti_colocation {
            inst.discard_anti_colocation_constraints();
        }
        let enc = encode(&inst, opts.encode)?;
        let objs = SearchObjectives::build(&enc)?;
        let (cnf, var_manager) = enc.to_cnf()?;
        let stats = Stats {
            n_objs: inst.n_objectives(),
            n_orig_clauses: cnf.len(),
            ..Stats::default()
        };
        let mut facade = Facade::new(oracle, var_manager.max_var())?;
        facade.add_cnf(cnf)?;
        Ok(Kernel {
            facade,
            inst,
            enc,
            objs,
            var_manager,
            opts,
            archive: Archive::new(),
            stats,
            logger: None,
        })
    }

    /// Decodes a model, evaluates it with the reference formulae, and feeds
    /// it to the archive
    pub fn record_model(&mut self, sol: &Assignment) -> SearchResult<InsertOutcome> {
        let placement = self.enc.map.decode(sol)?;
        debug_assert!(self.inst.check(&placement));
        let costs = self.inst.evaluate(&placement, self.opts.ignore_den_eval);
        self.stats.n_solutions += 1;
        if let Some(logger) = &mut self.logger {
            logger.log_solution(&costs).map_err(Termination::Error)?;
        }
        let points_before = self.archive.len();
        let outcome = self.archive.insert(costs.clone(), placement);
        if self.archive.len() > points_before {
            self.stats.n_non_dominated += 1;
            if let Some(logger) = &mut self.logger {
                logger.log_non_dominated(&costs).map_err(Termination::Error)?;
            }
        }
        Ok(outcome)
    }

    /// Logs a candidate cost point seen during minimization
    pub fn log_candidate(&mut self, costs: &CostVec, phase: Phase) -> SearchResult {
        self.stats.n_candidates += 1;
        if let Some(logger) = &mut self.logger {
            logger.log_candidate(costs, phase).map_err(Termination::Error)?;
        }
        Ok(())
    }

    /// Blocks every future model that weakly dominates the given one on the
    /// objective-literal level: at least one currently paid objective
    /// literal must flip. An empty clause (zero-cost model) exhausts the
    /// search on the next call.
    pub fn pareto_block_clause(&self, sol: &Assignment) -> Clause {
        let mut clause = Clause::new();
        for &(l, _) in &self.objs.merged.lits {
            if sol.lit_value(l) == TernaryVal::True {
                clause.add(!l);
            }
        }
        clause
    }

    /// The full model of the last satisfiable call. The assignment covers
    /// the auxiliary variables too; objective literals over conjunction and
    /// encoding variables must be readable from it.
    pub fn model(&self) -> anyhow::Result<Assignment> {
        let max = self
            .var_manager
            .max_var()
            .ok_or_else(|| anyhow::anyhow!("instance without variables has no model"))?;
        self.facade.solution(max)
    }
}

impl<O: SolveIncremental + LimitConflicts + CollectClauses> Kernel<O> {
    /// Internal integer cost of a model on each tightening objective
    pub fn internal_costs(&self, sol: &Assignment) -> Vec<usize> {
        self.objs
            .tightening()
            .iter()
            .map(|obj| obj.cost(sol))
            .collect()
    }

    /// Assumptions forcing the next model to weakly dominate the given
    /// internal cost point
    pub fn enforce_dominating(
        &mut self,
        costs: &[usize],
        encs: &mut [ObjEncoding],
    ) -> anyhow::Result<Vec<Lit>> {
        let mut assumps = vec![];
        for (enc, &cost) in encs.iter_mut().zip(costs) {
            enc.encode_ub_change(cost..cost + 1, self.facade.collector(), &mut self.var_manager)?;
            assumps.extend(enc.enforce_ub(cost)?);
        }
        Ok(assumps)
    }

    /// A clause blocking every model weakly dominated by the given internal
    /// cost point: at least one objective must be strictly better
    pub fn dominated_block_clause(
        &mut self,
        costs: &[usize],
        encs: &mut [ObjEncoding],
    ) -> anyhow::Result<Clause> {
        let mut clause = Clause::new();
        for (enc, &cost) in encs.iter_mut().zip(costs) {
            if cost == 0 {
                continue;
            }
            if let ObjEncoding::Constant = enc {
                continue;
            }
            enc.encode_ub_change(cost - 1..cost, self.facade.collector(), &mut self.var_manager)?;
            let assumps = enc.enforce_ub(cost - 1)?;
            if assumps.len() == 1 {
                clause.add(assumps[0]);
            } else {
                // bundle the bound selectors behind a fresh and-literal
                let and_lit = self.var_manager.new_var().pos_lit();
                for l in &assumps {
                    self.facade.add_clause(rustsat::clause![!and_lit, *l])?;
                }
                clause.add(and_lit);
            }
        }
        Ok(clause)
    }
}

/// What one driver step achieved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// More of the front may remain
    Continue,
    /// The Pareto front under the current encoding is exhausted
    Exhausted,
}

/// Per-flavour state behind the polymorphic step function
enum AlgState {
    ParetoMcs(ParetoMcs),
    Gia(Gia),
    Hash(HashEnum),
    Single(SingleObj),
}

/// The search driver: owns the kernel for the lifetime of the search and
/// coordinates the algorithm flavour against the archive and the budgets
pub struct Driver<O> {
    pub(crate) kernel: Kernel<O>,
    state: AlgState,
    /// Unfixing stream of the smart mutation service
    pub(crate) smart_rng: Pcg64,
}

impl<O: SolveIncremental + LimitConflicts + PhaseLit + CollectClauses> Driver<O> {
    pub fn new(inst: Instance, opts: SearchOptions, oracle: O) -> Result<Self, Error> {
        if opts.alg == Algorithm::ParetoLbx && opts.encode.hash_functions {
            return Err(Error::InvalidConfig(
                "hash functions are not supported by the LBX extractor".to_string(),
            ));
        }
        let kernel = Kernel::new(inst, opts, oracle)?;
        let state = match opts.alg {
            Algorithm::ParetoCld | Algorithm::ParetoLbx => {
                AlgState::ParetoMcs(ParetoMcs::new(&kernel))
            }
            Algorithm::Gia => AlgState::Gia(Gia::new(&kernel)),
            Algorithm::HashEnum => AlgState::Hash(HashEnum::new(&kernel)),
            Algorithm::Mcs | Algorithm::Pbo | Algorithm::LinearSearch => {
                AlgState::Single(SingleObj::new(&kernel))
            }
        };
        let smart_rng = substream(opts.seed, salt::SMART);
        Ok(Driver {
            kernel,
            state,
            smart_rng,
        })
    }

    /// Runs the search until the front is exhausted, the deadline fires, or
    /// an interrupt arrives. The archive holds whatever was found.
    pub fn solve(&mut self) -> SearchResult {
        self.kernel.stats.n_solve_calls += 1;
        let deadline = self
            .kernel
            .opts
            .time_limit
            .map(|limit| Instant::now() + limit);
        self.kernel.facade.set_deadline(deadline);
        loop {
            self.kernel.facade.check_termination()?;
            if self.step()? == Step::Exhausted {
                return Ok(());
            }
        }
    }

    /// Advances the search by one unit of work (typically one point of the
    /// front)
    pub fn step(&mut self) -> SearchResult<Step> {
        // the trivial instance has the empty placement as its only solution
        if self.kernel.inst.n_vms() == 0 {
            if self.kernel.archive.is_empty() {
                let dim = self.kernel.inst.n_objectives();
                self.kernel
                    .archive
                    .insert(CostVec::zero(dim), crate::types::Placement::empty());
            }
            return Ok(Step::Exhausted);
        }
        match &mut self.state {
            AlgState::ParetoMcs(state) => state.step(&mut self.kernel),
            AlgState::Gia(state) => state.step(&mut self.kernel),
            AlgState::Hash(state) => state.step(&mut self.kernel),
            AlgState::Single(state) => state.step(&mut self.kernel),
        }
    }

    /// The archive of non-dominated solutions found so far
    pub fn archive(&self) -> &Archive {
        &self.kernel.archive
    }

    pub fn stats(&self) -> Stats {
        let mut stats = self.kernel.stats;
        stats.n_oracle_calls = self.kernel.facade.n_calls();
        stats
    }

    pub fn instance(&self) -> &Instance {
        &self.kernel.inst
    }

    /// Serialises the encoded problem in multi-objective OPB format
    pub fn dump_moco<W: std::io::Write>(
        &self,
        writer: &mut W,
        allow_decimals: bool,
    ) -> anyhow::Result<()> {
        self.kernel.enc.dump_moco(writer, allow_decimals)
    }

    pub fn attach_logger<L: WriteSolverLog + 'static>(&mut self, logger: L) {
        self.kernel.logger = Some(Box::new(logger));
    }

    pub fn detach_logger(&mut self) -> Option<Box<dyn WriteSolverLog>> {
        self.kernel.logger.take()
    }

    pub fn interrupter(&self) -> Interrupter {
        self.kernel.facade.interrupter()
    }
}

/// Checks that a cost vector is all zero, in which case nothing can dominate
/// it and the search is finished after recording it
pub(crate) fn is_zero_cost(costs: &[usize]) -> bool {
    costs.iter().all(|&c| c == 0)
}

/// The default blocking clause: forbid the exact placement of a model
pub fn placement_blocking_clause(sol: &Assignment, enc: &Encoding) -> Clause {
    let mut clause = Clause::new();
    for var in enc.map.x_vars() {
        if sol.var_value(var) == TernaryVal::True {
            clause.add(var.neg_lit());
        }
    }
    clause
}
