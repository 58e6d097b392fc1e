use std::{
    fs,
    io::{BufWriter, Write},
    process::ExitCode,
    thread,
};

use cpu_time::ProcessTime;
use vmcwm_core::{prepro, Archive, Driver, Error, ProblemStats, Termination};

mod cli;
use cli::Cli;

/// The SAT solver used
type Oracle = rustsat_cadical::CaDiCaL<'static, 'static>;

fn main() -> ExitCode {
    let cli = match Cli::init() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    match sub_main(&cli) {
        Ok(code) => code,
        Err(err) => {
            let _ = cli.error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn sub_main(cli: &Cli) -> anyhow::Result<ExitCode> {
    let start = ProcessTime::now();
    cli.info("Parsing")?;
    let mut inst = prepro::parse(&cli.inst_path, cli.migration_percentile)?;
    cli.info(&format!(
        "Parsing time: {:.3} seconds",
        start.elapsed().as_secs_f64()
    ))?;

    if cli.ignore_platform {
        cli.info("Discarding platform constraints")?;
        inst.discard_platform_constraints();
    }
    if cli.ignore_colocation {
        cli.info("Discarding anti-colocation constraints")?;
        inst.discard_anti_colocation_constraints();
    }
    cli.print_problem_stats(&ProblemStats::of(&inst))?;

    if let Some(path) = &cli.dump_moco {
        return dump_moco(cli, inst, path);
    }

    cli.print_solver_config()?;

    let with_migration = inst.has_mappings();
    let runs = cli.multiple_seeds.unwrap_or(1).max(1);
    let mut combined = Archive::new();
    for run in 0..runs {
        let mut options = cli.options;
        options.seed = cli.options.seed.wrapping_add(run);
        if runs > 1 {
            cli.info(&format!("Run {} (seed {})", run, options.seed))?;
        }
        let mut driver = match Driver::new(inst.clone(), options, Oracle::default()) {
            Ok(driver) => driver,
            Err(Error::InfeasibleInstance(reason)) => {
                cli.info(&reason)?;
                println!("s FAILURE");
                return Ok(ExitCode::SUCCESS);
            }
            Err(err) => return Err(err.into()),
        };
        setup_cli_interaction(&mut driver, cli)?;
        match driver.solve() {
            Ok(()) => cli.info("finished solving the instance")?,
            Err(term @ (Termination::Deadline | Termination::Interrupted)) => {
                cli.log_termination(&term)?
            }
            Err(Termination::Error(err)) => return Err(err),
        }
        for entry in driver.archive() {
            for witness in entry.sols() {
                debug_assert!(inst.check(witness));
                combined.insert(entry.costs.clone(), witness.clone());
            }
        }
        cli.print_stats(driver.stats())?;
    }

    cli.print_archive(&combined, with_migration, &inst)?;
    if let Some(path) = &cli.dump_population {
        let mut writer = BufWriter::new(fs::File::create(path)?);
        combined.write_population(&mut writer)?;
        writer.flush()?;
        cli.info(&format!("dumped the final population to {path}"))?;
    }
    cli.info(&format!(
        "CPU time: {:.3} seconds",
        start.elapsed().as_secs_f64()
    ))?;
    Ok(ExitCode::SUCCESS)
}

fn dump_moco(cli: &Cli, inst: vmcwm_core::Instance, path: &str) -> anyhow::Result<ExitCode> {
    let driver = match Driver::new(inst, cli.options, Oracle::default()) {
        Ok(driver) => driver,
        Err(Error::InfeasibleInstance(reason)) => {
            cli.info(&reason)?;
            println!("s FAILURE");
            return Ok(ExitCode::SUCCESS);
        }
        Err(err) => return Err(err.into()),
    };
    let mut writer = BufWriter::new(fs::File::create(path)?);
    driver.dump_moco(&mut writer, cli.allow_decimals)?;
    writer.flush()?;
    cli.info(&format!("dumped the encoded instance to {path}"))?;
    Ok(ExitCode::SUCCESS)
}

fn setup_cli_interaction(driver: &mut Driver<Oracle>, cli: &Cli) -> anyhow::Result<()> {
    // forward termination signals to the cooperative interrupt flag
    let interrupter = driver.interrupter();
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGXCPU,
        signal_hook::consts::SIGABRT,
    ])?;
    thread::spawn(move || {
        for _ in signals.forever() {
            interrupter.interrupt();
        }
    });

    driver.attach_logger(cli.new_cli_logger());
    Ok(())
}
