//! # Options
//!
//! Configuration options for the consolidation search. The driver binary maps
//! its command line onto these types; embedded callers (e.g., evolutionary
//! algorithms using the smart mutation service) construct them directly.

use std::{fmt, time::Duration};

/// The search algorithm to run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Minimal-correction-subset minimization of the merged objective
    Mcs,
    /// Lexicographic pseudo-Boolean optimization, one objective at a time
    Pbo,
    /// Linear SAT-UNSAT descent on the merged objective
    LinearSearch,
    /// Guided improvement algorithm
    Gia,
    /// Hash-based model enumeration
    HashEnum,
    /// Pareto-MCS with the CLD extraction procedure
    #[default]
    ParetoCld,
    /// Pareto-MCS with the LBX extraction procedure
    ParetoLbx,
}

impl Algorithm {
    /// Whether the algorithm enumerates points of the Pareto front (as
    /// opposed to optimizing a single merged or lexicographic objective)
    pub fn is_pareto(&self) -> bool {
        matches!(
            self,
            Algorithm::Gia | Algorithm::HashEnum | Algorithm::ParetoCld | Algorithm::ParetoLbx
        )
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Mcs => write!(f, "MCS"),
            Algorithm::Pbo => write!(f, "PBO"),
            Algorithm::LinearSearch => write!(f, "LS"),
            Algorithm::Gia => write!(f, "GIA"),
            Algorithm::HashEnum => write!(f, "HE"),
            Algorithm::ParetoCld => write!(f, "PCLD"),
            Algorithm::ParetoLbx => write!(f, "PLBX"),
        }
    }
}

/// Switches consumed by the encoder
#[derive(Clone, Copy, Debug, Default)]
pub struct EncodeOptions {
    /// Emit usage-ordering constraints over capacity/cost-identical machines
    pub symmetry_breaking: bool,
    /// Drop allowed-machine (platform) restrictions
    pub ignore_platform: bool,
    /// Drop anti-colocation constraints
    pub ignore_anti_colocation: bool,
    /// Treat wastage as a pure numerator objective when searching
    pub ignore_denominators: bool,
    /// Permit the driver to extend the hard set with parity constraints
    pub hash_functions: bool,
}

/// Strategy for handling the divided (numerator/denominator) objective during
/// stratification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StratStrategy {
    /// No stratification; all soft literals form a single partition
    #[default]
    Off,
    /// Stratify numerator and denominator literals together on combined
    /// weight
    Merged,
    /// Stratify the two independently and alternate between the streams with
    /// probability proportional to their remaining weight
    Split,
}

impl fmt::Display for StratStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StratStrategy::Off => write!(f, "off"),
            StratStrategy::Merged => write!(f, "merged"),
            StratStrategy::Split => write!(f, "split"),
        }
    }
}

/// Stratifier parameters
#[derive(Clone, Copy, Debug)]
pub struct StratOptions {
    pub strategy: StratStrategy,
    /// Target ratio of literals to distinct weights per partition
    pub lit_weight_ratio: f64,
    /// Fixed number of partitions per objective; overrides the ratio
    pub partition_number: Option<usize>,
    /// Conflict budget per partition before it is folded into its successor.
    /// When `None`, partitions are solved without a conflict limit.
    pub part_max_conflicts: Option<u32>,
}

impl Default for StratOptions {
    fn default() -> Self {
        StratOptions {
            strategy: StratStrategy::Off,
            lit_weight_ratio: 15.0,
            partition_number: None,
            part_max_conflicts: None,
        }
    }
}

/// Parameters of the smart mutation / smart improvement service
#[derive(Clone, Copy, Debug, Default)]
pub struct SmartOptions {
    /// Conflict budget for a repair call; `None` leaves the oracle unlimited
    pub max_conflicts: Option<u32>,
    /// Unfix variables whose value contradicts a hard constraint when a
    /// budgeted repair comes back unsatisfiable
    pub domain_unfixing: bool,
    /// Drive feasible candidates towards the front with a short stratified
    /// Pareto-CLD run
    pub improvement: Option<ImproveOptions>,
}

/// Parameters of the smart improvement run
#[derive(Clone, Copy, Debug)]
pub struct ImproveOptions {
    /// Fraction of machine assignments to displace
    pub relax_rate: f64,
    /// Conflict budget per partition
    pub part_max_conflicts: u32,
    /// Total conflict budget for the improvement run; `None` is unlimited
    pub max_conflicts: Option<u32>,
    /// Literal-to-distinct-weight ratio for the improvement stratifier
    pub lit_weight_ratio: f64,
}

impl Default for ImproveOptions {
    fn default() -> Self {
        ImproveOptions {
            relax_rate: 0.2,
            part_max_conflicts: 200_000,
            max_conflicts: None,
            lit_weight_ratio: 15.0,
        }
    }
}

/// Solver-wide configuration options
#[derive(Clone, Copy, Debug)]
pub struct SearchOptions {
    pub alg: Algorithm,
    pub encode: EncodeOptions,
    pub strat: StratOptions,
    /// Rotate the soft-literal ordering between Pareto-MCS iterations
    /// (CLD only)
    pub path_diversification: bool,
    /// Drop denominators when evaluating solution quality
    pub ignore_den_eval: bool,
    /// Global wall-clock budget; `None` runs to exhaustion
    pub time_limit: Option<Duration>,
    /// Base seed from which all per-component generators are derived
    pub seed: u64,
    /// Number of parity constraints per hash slice; `None` derives one from
    /// the number of placement variables
    pub hashes_per_slice: Option<usize>,
    /// Maximum number of models enumerated under one hash slice
    pub models_per_slice: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            alg: Algorithm::default(),
            encode: EncodeOptions::default(),
            strat: StratOptions::default(),
            path_diversification: false,
            ignore_den_eval: false,
            time_limit: None,
            seed: 0,
            hashes_per_slice: None,
            models_per_slice: 10,
        }
    }
}
