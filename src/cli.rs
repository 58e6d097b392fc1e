//! # Command Line Interface for the Solver Binary

use std::{
    fmt,
    io::{Error as IOError, Write},
    time::Duration,
};

use clap::{Parser, ValueEnum};
use num_rational::Rational64;
use num_traits::ToPrimitive;
use termcolor::{Buffer, BufferWriter, Color, ColorSpec, WriteColor};
use vmcwm_core::{
    prepro, Algorithm, Archive, CostVec, Phase, ProblemStats, SearchOptions, Stats, StratStrategy,
    Termination, WriteSolverLog,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// The path to the instance file to load
    inst_path: String,
    /// The allocation algorithm to run
    #[arg(short, long, value_enum, default_value_t = AlgArg::Pcld)]
    algorithm: AlgArg,
    /// The wall-clock time limit in seconds (no limit by default)
    #[arg(short, long)]
    time_limit: Option<u64>,
    /// The fraction of total memory capacity that may be used up in
    /// migrations
    #[arg(short, long, default_value = "1.0")]
    migration_percentile: String,
    /// Emit usage-ordering constraints over identical machines
    #[arg(short = 's', long)]
    break_symmetries: bool,
    /// Ignore platform specific restrictions
    #[arg(long)]
    ignore_platform: bool,
    /// Ignore anti-colocation constraints
    #[arg(long)]
    ignore_colocation: bool,
    /// Ignore objective denominators when evaluating solution quality
    #[arg(long)]
    ignore_den_eval: bool,
    /// Ignore objective denominators when searching for allocations
    #[arg(long)]
    ignore_den_alloc: bool,
    /// Enable hash functions for the hash-based algorithms
    #[arg(long)]
    enable_hash: bool,
    /// Enable path diversification (PCLD only)
    #[arg(long)]
    enable_path_diversification: bool,
    /// Enable stratification with the given division-reduction strategy
    #[arg(long, value_enum)]
    stratify: Option<StratArg>,
    /// Conflict budget per partition for the stratified algorithms; when
    /// not given, partitions are solved without a conflict limit
    #[arg(long)]
    part_max_conflicts: Option<u32>,
    /// The literal-to-distinct-weight ratio for stratification
    #[arg(long, default_value_t = 15.0)]
    literal_weight_ratio: f64,
    /// The number of partitions per objective; overrides the ratio
    #[arg(long)]
    partition_number: Option<usize>,
    /// The number of parity constraints per hash slice (derived from the
    /// instance size when not given)
    #[arg(long)]
    hashes_per_slice: Option<usize>,
    /// The maximum number of models enumerated under one hash slice
    #[arg(long, default_value_t = 10)]
    models_per_slice: usize,
    /// Base seed for all randomized components
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Run the algorithm once per seed in `seed..seed+count`, resetting the
    /// time limit between runs
    #[arg(long)]
    multiple_seeds: Option<u64>,
    /// Print the allocation of every reported solution
    #[arg(long)]
    print_allocations: bool,
    /// Dump the instance in multi-objective OPB format to the given path
    /// instead of solving
    #[arg(long)]
    dump_moco: Option<String>,
    /// Dump the final population to the given file
    #[arg(long)]
    dump_population: Option<String>,
    /// Allow decimal coefficients in the OPB dump
    #[arg(long)]
    allow_decimals: bool,
    /// Don't print statistics
    #[arg(long)]
    no_print_stats: bool,
    /// Log candidate cost points along the search trace
    #[arg(long)]
    log_candidates: bool,
    /// Log found solutions as they are discovered
    #[arg(long)]
    log_solutions: bool,
    /// Log non-dominated points as they are discovered
    #[arg(long)]
    log_non_dominated: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum AlgArg {
    /// Correction-subset minimization of the merged objective
    Mcs,
    /// Lexicographic pseudo-Boolean optimization
    Pbo,
    /// Linear SAT-UNSAT search on the merged objective
    Ls,
    /// Guided improvement algorithm
    Gia,
    /// Hash-based enumeration
    He,
    /// Pareto-MCS with the CLD extractor
    Pcld,
    /// Pareto-MCS with the LBX extractor
    Plbx,
}

impl fmt::Display for AlgArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlgArg::Mcs => "mcs",
            AlgArg::Pbo => "pbo",
            AlgArg::Ls => "ls",
            AlgArg::Gia => "gia",
            AlgArg::He => "he",
            AlgArg::Pcld => "pcld",
            AlgArg::Plbx => "plbx",
        };
        write!(f, "{name}")
    }
}

impl From<AlgArg> for Algorithm {
    fn from(arg: AlgArg) -> Algorithm {
        match arg {
            AlgArg::Mcs => Algorithm::Mcs,
            AlgArg::Pbo => Algorithm::Pbo,
            AlgArg::Ls => Algorithm::LinearSearch,
            AlgArg::Gia => Algorithm::Gia,
            AlgArg::He => Algorithm::HashEnum,
            AlgArg::Pcld => Algorithm::ParetoCld,
            AlgArg::Plbx => Algorithm::ParetoLbx,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum StratArg {
    /// Merge reduced objectives into one stratification
    Merged,
    /// Probability-split between the objective streams
    Split,
}

pub struct Cli {
    pub options: SearchOptions,
    pub inst_path: String,
    pub migration_percentile: Rational64,
    pub ignore_platform: bool,
    pub ignore_colocation: bool,
    pub print_allocations: bool,
    pub dump_moco: Option<String>,
    pub dump_population: Option<String>,
    pub allow_decimals: bool,
    pub multiple_seeds: Option<u64>,
    print_stats: bool,
    stdout: BufferWriter,
    stderr: BufferWriter,
    logger_config: LoggerConfig,
}

#[derive(Clone, Copy)]
struct LoggerConfig {
    log_candidates: bool,
    log_solutions: bool,
    log_non_dominated: bool,
}

impl Cli {
    pub fn init() -> anyhow::Result<Self> {
        let args = CliArgs::parse();
        let migration_percentile = prepro::parse_decimal(&args.migration_percentile, 0)
            .map_err(|_| anyhow::anyhow!("invalid migration percentile"))?;
        let options = SearchOptions {
            alg: args.algorithm.into(),
            encode: vmcwm_core::EncodeOptions {
                symmetry_breaking: args.break_symmetries,
                ignore_platform: args.ignore_platform,
                ignore_anti_colocation: args.ignore_colocation,
                ignore_denominators: args.ignore_den_alloc,
                hash_functions: args.enable_hash,
            },
            strat: vmcwm_core::StratOptions {
                strategy: match args.stratify {
                    None => StratStrategy::Off,
                    Some(StratArg::Merged) => StratStrategy::Merged,
                    Some(StratArg::Split) => StratStrategy::Split,
                },
                lit_weight_ratio: args.literal_weight_ratio,
                partition_number: args.partition_number,
                part_max_conflicts: args.part_max_conflicts,
            },
            path_diversification: args.enable_path_diversification,
            ignore_den_eval: args.ignore_den_eval,
            time_limit: args.time_limit.map(Duration::from_secs),
            seed: args.seed,
            hashes_per_slice: args.hashes_per_slice,
            models_per_slice: args.models_per_slice,
        };
        Ok(Cli {
            options,
            inst_path: args.inst_path,
            migration_percentile,
            ignore_platform: args.ignore_platform,
            ignore_colocation: args.ignore_colocation,
            print_allocations: args.print_allocations,
            dump_moco: args.dump_moco,
            dump_population: args.dump_population,
            allow_decimals: args.allow_decimals,
            multiple_seeds: args.multiple_seeds,
            print_stats: !args.no_print_stats,
            stdout: BufferWriter::stdout(color_choice(atty::Stream::Stdout)),
            stderr: BufferWriter::stderr(color_choice(atty::Stream::Stderr)),
            logger_config: LoggerConfig {
                log_candidates: args.log_candidates,
                log_solutions: args.log_solutions,
                log_non_dominated: args.log_non_dominated,
            },
        })
    }

    pub fn new_cli_logger(&self) -> CliLogger {
        CliLogger {
            stdout: BufferWriter::stdout(color_choice(atty::Stream::Stdout)),
            config: self.logger_config,
        }
    }

    pub fn info(&self, msg: &str) -> Result<(), IOError> {
        let mut buffer = self.stdout.buffer();
        write_comment(&mut buffer)?;
        writeln!(&mut buffer, "{}", msg)?;
        self.stdout.print(&buffer)?;
        Ok(())
    }

    pub fn warning(&self, msg: &str) -> Result<(), IOError> {
        let mut buffer = self.stderr.buffer();
        buffer.set_color(ColorSpec::new().set_bold(true).set_fg(Some(Color::Yellow)))?;
        write!(&mut buffer, "warning")?;
        buffer.reset()?;
        writeln!(&mut buffer, ": {}", msg)?;
        self.stderr.print(&buffer)?;
        Ok(())
    }

    pub fn error(&self, msg: &str) -> Result<(), IOError> {
        let mut buffer = self.stderr.buffer();
        buffer.set_color(ColorSpec::new().set_bold(true).set_fg(Some(Color::Red)))?;
        write!(&mut buffer, "error")?;
        buffer.reset()?;
        writeln!(&mut buffer, ": {}", msg)?;
        self.stderr.print(&buffer)?;
        Ok(())
    }

    pub fn log_termination(&self, term: &Termination) -> Result<(), IOError> {
        self.info(&format!("{}", term))
    }

    pub fn print_solver_config(&self) -> Result<(), IOError> {
        let mut buffer = self.stdout.buffer();
        writeln!(
            &mut buffer,
            "c ======== {} Configuration ========",
            self.options.alg
        )?;
        if self.options.alg == Algorithm::ParetoCld {
            writeln!(
                &mut buffer,
                "c  Path Diversification:  {}",
                enabled(self.options.path_diversification)
            )?;
        }
        match self.options.strat.strategy {
            StratStrategy::Off => writeln!(&mut buffer, "c  Stratification:        disabled")?,
            strategy => {
                writeln!(&mut buffer, "c  Stratification:        {}", strategy)?;
                match self.options.strat.partition_number {
                    Some(n) => writeln!(&mut buffer, "c  Partitions:            {}", n)?,
                    None => writeln!(
                        &mut buffer,
                        "c  Literal-Weight Ratio:  {}",
                        self.options.strat.lit_weight_ratio
                    )?,
                }
                match self.options.strat.part_max_conflicts {
                    Some(pmc) => writeln!(&mut buffer, "c  Part Max Conflicts:    {}", pmc)?,
                    None => writeln!(&mut buffer, "c  Part Max Conflicts:    unlimited")?,
                }
            }
        }
        writeln!(
            &mut buffer,
            "c  Denominators:          {}",
            if self.options.encode.ignore_denominators {
                "ignored"
            } else {
                "reduced"
            }
        )?;
        writeln!(
            &mut buffer,
            "c  Hash Functions:        {}",
            enabled(self.options.encode.hash_functions)
        )?;
        writeln!(
            &mut buffer,
            "c  Symmetry Breaking:     {}",
            enabled(self.options.encode.symmetry_breaking)
        )?;
        writeln!(&mut buffer, "c ====================================")?;
        self.stdout.print(&buffer)?;
        Ok(())
    }

    pub fn print_problem_stats(&self, stats: &ProblemStats) -> Result<(), IOError> {
        let mut buffer = self.stdout.buffer();
        writeln!(&mut buffer, "c  Physical machines:  {}", stats.n_pms)?;
        writeln!(&mut buffer, "c  Jobs:               {}", stats.n_jobs)?;
        writeln!(&mut buffer, "c  Virtual machines:   {}", stats.n_vms)?;
        writeln!(&mut buffer, "c  Current mappings:   {}", stats.n_mappings)?;
        writeln!(
            &mut buffer,
            "c  CPU capacity/demand: {}/{}",
            stats.total_cpu_capacity, stats.total_cpu_demand
        )?;
        writeln!(
            &mut buffer,
            "c  Mem capacity/demand: {}/{}",
            stats.total_mem_capacity, stats.total_mem_demand
        )?;
        writeln!(&mut buffer, "c  Migration budget:   {}", stats.migration_budget)?;
        self.stdout.print(&buffer)?;
        Ok(())
    }

    /// Prints the final archive in the result-line format: one
    /// `e <energy> w <wastage> [m <migration>]` line per solution
    pub fn print_archive(
        &self,
        archive: &Archive,
        with_migration: bool,
        inst: &vmcwm_core::Instance,
    ) -> Result<(), IOError> {
        let mut buffer = self.stdout.buffer();
        if archive.is_empty() {
            writeln!(&mut buffer, "s FAILURE")?;
            self.stdout.print(&buffer)?;
            return Ok(());
        }
        writeln!(&mut buffer, "s SUCCESS")?;
        for entry in archive.iter() {
            let energy = entry.costs[0].to_f64().unwrap_or(f64::NAN);
            let wastage = entry.costs[1].to_f64().unwrap_or(f64::NAN);
            if with_migration {
                writeln!(
                    &mut buffer,
                    "e {:.5} \tw {:.5} \tm {}",
                    energy,
                    wastage,
                    entry.costs[2].to_integer()
                )?;
            } else {
                writeln!(&mut buffer, "e {:.5} \tw {:.5}", energy, wastage)?;
            }
        }
        if self.print_allocations {
            for (idx, entry) in archive.iter().enumerate() {
                writeln!(&mut buffer, "s SOLUTION {}", idx)?;
                for (vm_idx, pm) in entry.witness().iter() {
                    writeln!(&mut buffer, "p {} -> {}", inst.vm(vm_idx).vm_ref(), pm)?;
                }
            }
        }
        self.stdout.print(&buffer)?;
        Ok(())
    }

    pub fn print_stats(&self, stats: Stats) -> Result<(), IOError> {
        if !self.print_stats {
            return Ok(());
        }
        let mut buffer = self.stdout.buffer();
        writeln!(&mut buffer, "c  Solve calls:        {}", stats.n_solve_calls)?;
        writeln!(&mut buffer, "c  Oracle calls:       {}", stats.n_oracle_calls)?;
        writeln!(&mut buffer, "c  Solutions:          {}", stats.n_solutions)?;
        writeln!(&mut buffer, "c  Non-dominated:      {}", stats.n_non_dominated)?;
        writeln!(&mut buffer, "c  Candidates:         {}", stats.n_candidates)?;
        writeln!(&mut buffer, "c  Partitions:         {}", stats.n_partitions)?;
        writeln!(&mut buffer, "c  Partitions folded:  {}", stats.n_partitions_folded)?;
        writeln!(&mut buffer, "c  Hash rounds:        {}", stats.n_hash_rounds)?;
        self.stdout.print(&buffer)?;
        Ok(())
    }
}

fn color_choice(stream: atty::Stream) -> termcolor::ColorChoice {
    if atty::is(stream) {
        termcolor::ColorChoice::Auto
    } else {
        termcolor::ColorChoice::Never
    }
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn write_comment(buffer: &mut Buffer) -> Result<(), IOError> {
    buffer.set_color(ColorSpec::new().set_fg(Some(Color::Blue)))?;
    write!(buffer, "c ")?;
    buffer.reset()?;
    Ok(())
}

/// Logger printing search events as comment lines
pub struct CliLogger {
    stdout: BufferWriter,
    config: LoggerConfig,
}

impl CliLogger {
    fn comment_line(&self, args: fmt::Arguments) -> anyhow::Result<()> {
        let mut buffer = self.stdout.buffer();
        write_comment(&mut buffer)?;
        writeln!(&mut buffer, "{}", args)?;
        self.stdout.print(&buffer)?;
        Ok(())
    }
}

impl WriteSolverLog for CliLogger {
    fn log_candidate(&mut self, costs: &CostVec, phase: Phase) -> anyhow::Result<()> {
        if self.config.log_candidates {
            self.comment_line(format_args!("candidate {} ({})", costs, phase))?;
        }
        Ok(())
    }

    fn log_solution(&mut self, costs: &CostVec) -> anyhow::Result<()> {
        if self.config.log_solutions {
            self.comment_line(format_args!("solution {}", costs))?;
        }
        Ok(())
    }

    fn log_non_dominated(&mut self, costs: &CostVec) -> anyhow::Result<()> {
        if self.config.log_non_dominated {
            self.comment_line(format_args!("non-dominated {}", costs))?;
        }
        Ok(())
    }

    fn log_message(&mut self, msg: &str) -> anyhow::Result<()> {
        self.comment_line(format_args!("{}", msg))
    }
}
