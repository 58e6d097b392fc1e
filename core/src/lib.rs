//! # vmcwm-core
//!
//! Constraint-based Pareto search for virtual machine consolidation with
//! migration. The instance model is encoded as a pseudo-Boolean constraint
//! system with linear objectives (energy, resource wastage, migration); the
//! search algorithms enumerate non-dominated placements through minimal
//! correction subsets (the CLD and LBX extractors, optionally stratified),
//! guided improvement, hash-sliced model enumeration, or single-objective
//! descent, all against one incremental SAT oracle and one shared time
//! budget. A smart mutation / smart improvement service exposes budgeted
//! repair and local search to evolutionary callers.

use std::fmt;

pub mod archive;
pub mod encode;
pub mod instance;
pub mod objective;
pub mod options;
pub mod prepro;
pub mod smart;
pub mod solver;
pub mod stratify;
pub mod termination;
pub mod types;

pub mod algs;

pub use algs::{placement_blocking_clause, Driver, Step};
pub use archive::{Archive, Entry, InsertOutcome};
pub use instance::{Instance, Job, Mapping, PhysicalMachine, ProblemStats, VirtualMachine};
pub use options::{
    Algorithm, EncodeOptions, ImproveOptions, SearchOptions, SmartOptions, StratOptions,
    StratStrategy,
};
pub use smart::SmartOutcome;
pub use solver::Interrupter;
pub use termination::{SearchResult, Termination};
pub use types::{Cost, CostVec, Placement, VmRef};

/// Errors that abort a search before it starts
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The instance cannot have any feasible placement; detected at
    /// encoding time
    #[error("infeasible instance: {0}")]
    InfeasibleInstance(String),
    /// Reduced objective weights exceed the integer representation
    #[error("objective weights exceed the integer representation")]
    EncodingOverflow,
    /// The requested option combination is not supported
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Algorithm phases reported to loggers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Outer enumeration loop
    OuterLoop,
    /// Bound tightening towards one point of the front
    Minimization,
    /// Model enumeration inside a hash slice
    Enumeration,
    /// Smart mutation repair
    Repair,
    /// Smart improvement neighbourhood search
    Improvement,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::OuterLoop => write!(f, "outer-loop"),
            Phase::Minimization => write!(f, "minimization"),
            Phase::Enumeration => write!(f, "enumeration"),
            Phase::Repair => write!(f, "repair"),
            Phase::Improvement => write!(f, "improvement"),
        }
    }
}

/// Statistics of a search run
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Stats {
    /// The number of calls to [`Driver::solve`]
    pub n_solve_calls: usize,
    /// The number of calls to the SAT oracle
    pub n_oracle_calls: usize,
    /// The number of feasible models decoded and evaluated
    pub n_solutions: usize,
    /// The number of archive insertions that survived dominance pruning
    pub n_non_dominated: usize,
    /// The number of candidate cost points seen during minimization
    pub n_candidates: usize,
    /// The number of objectives reported for the instance
    pub n_objs: usize,
    /// The number of clauses of the encoded hard constraint set
    pub n_orig_clauses: usize,
    /// The number of objective partitions processed
    pub n_partitions: usize,
    /// The number of partitions folded into their successor after budget
    /// exhaustion
    pub n_partitions_folded: usize,
    /// The number of hash slices sampled
    pub n_hash_rounds: usize,
}

/// A logger to attach to a search driver
pub trait WriteSolverLog {
    /// Adds a candidate cost point to the log
    fn log_candidate(&mut self, costs: &CostVec, phase: Phase) -> anyhow::Result<()>;
    /// Adds a feasible solution to the log
    fn log_solution(&mut self, costs: &CostVec) -> anyhow::Result<()>;
    /// Adds a new non-dominated point to the log
    fn log_non_dominated(&mut self, costs: &CostVec) -> anyhow::Result<()>;
    /// Logs any string
    fn log_message(&mut self, msg: &str) -> anyhow::Result<()>;
}
