//! # Instance Input
//!
//! Parsing of consolidation instances from their text representation into the
//! typed [`Instance`] model. The format is line oriented; `#` starts a
//! comment and blank lines are skipped:
//!
//! ```text
//! pms <n>
//! <cpu> <mem> <idle> <full>            one line per machine, ids 0..n
//! jobs <j> <v>                         j jobs, v VMs in total
//! <job> <index> <cpu> <mem> <anti> [allowed machine ids...]
//! maps <m>
//! <job> <index> <machine>
//! ```
//!
//! Energy costs accept decimal notation and are kept as exact rationals.

use std::{
    fs,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::Context;
use num_rational::Rational64;

use crate::{
    instance::{Instance, Job, Mapping, PhysicalMachine, VirtualMachine},
    types::VmRef,
};

/// Parses an instance file. The migration percentile is not part of the file
/// format; it is a run parameter supplied by the caller.
pub fn parse<P: AsRef<Path>>(
    path: P,
    migration_percentile: Rational64,
) -> anyhow::Result<Instance> {
    let file = fs::File::open(path.as_ref())
        .with_context(|| format!("cannot open instance file {:?}", path.as_ref()))?;
    parse_reader(BufReader::new(file), migration_percentile)
}

/// Parses an instance from any buffered reader. Used by the tests to parse
/// inline literals.
pub fn parse_reader<R: BufRead>(
    reader: R,
    migration_percentile: Rational64,
) -> anyhow::Result<Instance> {
    let mut lines = Lines::new(reader);

    let header = lines.expect_line()?;
    let n_pms = expect_header(&header, "pms", lines.number)?;
    let mut pms = Vec::with_capacity(n_pms);
    for id in 0..n_pms {
        let line = lines.expect_line()?;
        let fields = split(&line);
        anyhow::ensure!(
            fields.len() == 4,
            "line {}: expected `<cpu> <mem> <idle> <full>`",
            lines.number
        );
        pms.push(PhysicalMachine {
            id,
            cpu: parse_int(fields[0], lines.number)?,
            mem: parse_int(fields[1], lines.number)?,
            idle_energy: parse_decimal(fields[2], lines.number)?,
            full_energy: parse_decimal(fields[3], lines.number)?,
        });
    }

    let header = lines.expect_line()?;
    let fields = split(&header);
    anyhow::ensure!(
        fields.len() == 3 && fields[0] == "jobs",
        "line {}: expected `jobs <count> <vms>`",
        lines.number
    );
    let n_jobs: usize = parse_count(fields[1], lines.number)?;
    let n_vms: usize = parse_count(fields[2], lines.number)?;
    let mut jobs: Vec<Job> = Vec::with_capacity(n_jobs);
    for _ in 0..n_vms {
        let line = lines.expect_line()?;
        let fields = split(&line);
        anyhow::ensure!(
            fields.len() >= 5,
            "line {}: expected `<job> <index> <cpu> <mem> <anti> [allowed...]`",
            lines.number
        );
        let job_id: usize = parse_count(fields[0], lines.number)?;
        let index: usize = parse_count(fields[1], lines.number)?;
        let vm = VirtualMachine {
            job: job_id,
            index,
            cpu: parse_int(fields[2], lines.number)?,
            mem: parse_int(fields[3], lines.number)?,
            anti_colocatable: parse_flag(fields[4], lines.number)?,
            allowed: fields[5..]
                .iter()
                .map(|f| parse_count(f, lines.number))
                .collect::<anyhow::Result<_>>()?,
        };
        match jobs.iter_mut().find(|j| j.id == job_id) {
            Some(job) => {
                anyhow::ensure!(
                    vm.index == job.vms.len(),
                    "line {}: VM indices of job {} must be consecutive",
                    lines.number,
                    job_id
                );
                job.vms.push(vm);
            }
            None => {
                anyhow::ensure!(
                    vm.index == 0,
                    "line {}: first VM of job {} must have index 0",
                    lines.number,
                    job_id
                );
                jobs.push(Job {
                    id: job_id,
                    vms: vec![vm],
                });
            }
        }
    }
    anyhow::ensure!(
        jobs.len() == n_jobs,
        "instance declares {} jobs but defines {}",
        n_jobs,
        jobs.len()
    );

    let header = lines.expect_line()?;
    let n_maps = expect_header(&header, "maps", lines.number)?;
    let mut mappings = Vec::with_capacity(n_maps);
    for _ in 0..n_maps {
        let line = lines.expect_line()?;
        let fields = split(&line);
        anyhow::ensure!(
            fields.len() == 3,
            "line {}: expected `<job> <index> <machine>`",
            lines.number
        );
        mappings.push(Mapping {
            vm: VmRef {
                job: parse_count(fields[0], lines.number)?,
                index: parse_count(fields[1], lines.number)?,
            },
            pm: parse_count(fields[2], lines.number)?,
        });
    }

    Instance::new(pms, jobs, mappings, migration_percentile)
}

struct Lines<R> {
    reader: R,
    number: usize,
}

impl<R: BufRead> Lines<R> {
    fn new(reader: R) -> Self {
        Lines { reader, number: 0 }
    }

    /// Next line that is neither blank nor a comment
    fn expect_line(&mut self) -> anyhow::Result<String> {
        loop {
            let mut buf = String::new();
            let read = self.reader.read_line(&mut buf)?;
            anyhow::ensure!(read > 0, "unexpected end of instance file");
            self.number += 1;
            let line = buf.split('#').next().unwrap_or("").trim();
            if !line.is_empty() {
                return Ok(line.to_string());
            }
        }
    }
}

fn split(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

fn expect_header(line: &str, keyword: &str, number: usize) -> anyhow::Result<usize> {
    let fields = split(line);
    anyhow::ensure!(
        fields.len() == 2 && fields[0] == keyword,
        "line {}: expected `{} <count>`",
        number,
        keyword
    );
    parse_count(fields[1], number)
}

fn parse_count(field: &str, number: usize) -> anyhow::Result<usize> {
    field
        .parse()
        .with_context(|| format!("line {number}: invalid count {field:?}"))
}

fn parse_int(field: &str, number: usize) -> anyhow::Result<i64> {
    let val: i64 = field
        .parse()
        .with_context(|| format!("line {number}: invalid integer {field:?}"))?;
    anyhow::ensure!(val >= 0, "line {number}: negative resource value");
    Ok(val)
}

fn parse_flag(field: &str, number: usize) -> anyhow::Result<bool> {
    match field {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => anyhow::bail!("line {number}: flag must be 0 or 1, got {field:?}"),
    }
}

/// Parses a decimal literal such as `12`, `0.5`, or `3.75` into an exact
/// rational
pub fn parse_decimal(field: &str, number: usize) -> anyhow::Result<Rational64> {
    let invalid = || format!("line {number}: invalid decimal {field:?}");
    match field.split_once('.') {
        None => {
            let int: i64 = field.parse().with_context(invalid)?;
            Ok(Rational64::from_integer(int))
        }
        Some((int_part, frac_part)) => {
            anyhow::ensure!(
                !frac_part.is_empty() && frac_part.chars().all(|c| c.is_ascii_digit()),
                invalid()
            );
            let negative = int_part.starts_with('-');
            let int: i64 = if int_part.is_empty() || int_part == "-" {
                0
            } else {
                int_part.parse().with_context(invalid)?
            };
            let num: i64 = frac_part.parse().with_context(invalid)?;
            let den = 10i64
                .checked_pow(frac_part.len() as u32)
                .ok_or_else(|| anyhow::anyhow!(invalid()))?;
            let frac = Rational64::new(num, den);
            let int = Rational64::from_integer(int);
            Ok(if negative { int - frac } else { int + frac })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SMALL: &str = "\
# two machines, one job
pms 2
4 4 1 3
2 2 0.5 1.5
jobs 1 2
0 0 1 1 1
0 1 1 2 1 1
maps 1
0 0 0
";

    #[test]
    fn parses_small_instance() {
        let inst =
            parse_reader(Cursor::new(SMALL), Rational64::from_integer(1)).unwrap();
        assert_eq!(inst.n_pms(), 2);
        assert_eq!(inst.n_vms(), 2);
        assert_eq!(inst.pms()[1].idle_energy, Rational64::new(1, 2));
        assert!(inst.vm(1).anti_colocatable);
        assert_eq!(inst.vm(1).allowed, vec![1]);
        assert_eq!(inst.mappings().len(), 1);
    }

    #[test]
    fn decimal_parsing_is_exact() {
        assert_eq!(parse_decimal("0.25", 1).unwrap(), Rational64::new(1, 4));
        assert_eq!(parse_decimal("3", 1).unwrap(), Rational64::from_integer(3));
        assert_eq!(parse_decimal("-0.5", 1).unwrap(), Rational64::new(-1, 2));
        assert!(parse_decimal("1.x", 1).is_err());
    }

    #[test]
    fn truncated_file_errors() {
        let res = parse_reader(Cursor::new("pms 2\n1 1 1 1\n"), Rational64::from_integer(1));
        assert!(res.is_err());
    }
}
