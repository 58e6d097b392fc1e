//! End-to-end scenarios over the real CaDiCaL oracle.

use std::time::Duration;

use num_rational::Rational64;
use vmcwm_core::{
    Algorithm, Driver, Instance, Job, Mapping, PhysicalMachine, Placement, SearchOptions,
    SmartOptions, StratStrategy, Termination, VirtualMachine, VmRef,
};

type Oracle = rustsat_cadical::CaDiCaL<'static, 'static>;

fn pm(id: usize, cpu: i64, mem: i64, idle: i64, full: i64) -> PhysicalMachine {
    PhysicalMachine {
        id,
        cpu,
        mem,
        idle_energy: Rational64::from_integer(idle),
        full_energy: Rational64::from_integer(full),
    }
}

fn vm(job: usize, index: usize, cpu: i64, mem: i64) -> VirtualMachine {
    VirtualMachine {
        job,
        index,
        cpu,
        mem,
        allowed: vec![],
        anti_colocatable: false,
    }
}

fn instance(
    pms: Vec<PhysicalMachine>,
    jobs: Vec<Job>,
    mappings: Vec<Mapping>,
    percentile: Rational64,
) -> Instance {
    Instance::new(pms, jobs, mappings, percentile).unwrap()
}

fn solve(inst: &Instance, options: SearchOptions) -> Driver<Oracle> {
    let mut driver = Driver::new(inst.clone(), options, Oracle::default()).unwrap();
    driver.solve().unwrap();
    driver
}

fn front_of(driver: &Driver<Oracle>) -> Vec<Vec<Rational64>> {
    driver
        .archive()
        .iter()
        .map(|entry| entry.costs.iter().copied().collect())
        .collect()
}

macro_rules! check_front {
    ($driver:expr, $expected:expr) => {{
        let mut front = front_of(&$driver);
        front.sort();
        let mut expected: Vec<Vec<Rational64>> = $expected;
        expected.sort();
        assert_eq!(front, expected);
    }};
}

fn rat(n: i64, d: i64) -> Rational64 {
    Rational64::new(n, d)
}

fn int(n: i64) -> Rational64 {
    Rational64::from_integer(n)
}

/// 1 machine (4/4, idle 1, full 3), 1 VM (1/1): a single point with energy
/// `1 + 1/4 · 2` and zero wastage
fn singleton() -> Instance {
    instance(
        vec![pm(0, 4, 4, 1, 3)],
        vec![Job {
            id: 0,
            vms: vec![vm(0, 0, 1, 1)],
        }],
        vec![],
        int(1),
    )
}

/// 3 heterogeneous machines, 3 unit VMs: the front trades energy for
/// wastage between the cheap imbalanced machine and the pricey balanced one
fn tradeoff() -> Instance {
    instance(
        vec![pm(0, 6, 3, 1, 2), pm(1, 3, 3, 2, 4), pm(2, 1, 1, 5, 9)],
        vec![Job {
            id: 0,
            vms: vec![vm(0, 0, 1, 1), vm(0, 1, 1, 1), vm(0, 2, 1, 1)],
        }],
        vec![],
        int(1),
    )
}

fn tradeoff_front() -> Vec<Vec<Rational64>> {
    vec![vec![rat(3, 2), rat(1, 2)], vec![int(4), int(0)]]
}

#[test]
fn singleton_pareto_cld() {
    let driver = solve(&singleton(), SearchOptions::default());
    check_front!(driver, vec![vec![rat(3, 2), int(0)]]);
}

#[test]
fn singleton_all_algorithms_agree() {
    for alg in [
        Algorithm::ParetoCld,
        Algorithm::ParetoLbx,
        Algorithm::Gia,
        Algorithm::LinearSearch,
        Algorithm::Pbo,
        Algorithm::Mcs,
    ] {
        let driver = solve(
            &singleton(),
            SearchOptions {
                alg,
                ..SearchOptions::default()
            },
        );
        assert!(
            driver
                .archive()
                .iter()
                .any(|e| e.costs.0 == vec![rat(3, 2), int(0)]),
            "{alg} missed the optimum"
        );
    }
}

#[test]
fn anti_colocation_forces_distinct_machines() {
    let mut vms = vec![vm(0, 0, 2, 2), vm(0, 1, 2, 2)];
    for vm in &mut vms {
        vm.anti_colocatable = true;
    }
    let inst = instance(
        vec![pm(0, 2, 2, 1, 2), pm(1, 2, 2, 1, 2)],
        vec![Job { id: 0, vms }],
        vec![],
        int(1),
    );
    let mut options = SearchOptions::default();
    options.encode.symmetry_breaking = true;
    let driver = solve(&inst, options);
    check_front!(driver, vec![vec![int(4), int(0)]]);
    let entry = driver.archive().iter().next().unwrap();
    for witness in entry.sols() {
        assert_ne!(witness.pm(0), witness.pm(1));
    }
}

#[test]
fn platform_constraint_overrides_cost() {
    let mut only_second = vm(0, 0, 1, 1);
    only_second.allowed = vec![1];
    let inst = instance(
        vec![pm(0, 4, 4, 1, 3), pm(1, 4, 4, 2, 4)],
        vec![Job {
            id: 0,
            vms: vec![only_second],
        }],
        vec![],
        int(1),
    );
    let driver = solve(&inst, SearchOptions::default());
    for entry in driver.archive() {
        for witness in entry.sols() {
            assert_eq!(witness.pm(0), 1);
        }
    }
    assert!(!driver.archive().is_empty());
}

#[test]
fn zero_migration_budget_pins_mapped_vms() {
    let inst = instance(
        vec![pm(0, 4, 4, 1, 3), pm(1, 4, 4, 1, 3)],
        vec![Job {
            id: 0,
            vms: vec![vm(0, 0, 1, 1)],
        }],
        vec![Mapping {
            vm: VmRef { job: 0, index: 0 },
            pm: 0,
        }],
        int(0),
    );
    let driver = solve(&inst, SearchOptions::default());
    assert!(!driver.archive().is_empty());
    for entry in driver.archive() {
        for witness in entry.sols() {
            assert_eq!(witness.pm(0), 0);
        }
        // three objectives, no memory moved
        assert_eq!(entry.costs.len(), 3);
        assert_eq!(entry.costs[2], int(0));
    }
}

#[test]
fn tradeoff_front_is_an_antichain() {
    let driver = solve(&tradeoff(), SearchOptions::default());
    check_front!(driver, tradeoff_front());
    for a in driver.archive() {
        for b in driver.archive() {
            assert!(!a.costs.dominates(&b.costs));
        }
    }
}

#[test]
fn tradeoff_front_via_lbx_and_gia() {
    for alg in [Algorithm::ParetoLbx, Algorithm::Gia] {
        let driver = solve(
            &tradeoff(),
            SearchOptions {
                alg,
                ..SearchOptions::default()
            },
        );
        check_front!(driver, tradeoff_front());
    }
}

#[test]
fn stratification_preserves_the_front() {
    for strategy in [StratStrategy::Merged, StratStrategy::Split] {
        let mut options = SearchOptions::default();
        options.strat.strategy = strategy;
        options.strat.lit_weight_ratio = 1.0;
        let driver = solve(&tradeoff(), options);
        check_front!(driver, tradeoff_front());
    }
}

#[test]
fn fixed_partition_count_preserves_the_front() {
    let mut options = SearchOptions::default();
    options.strat.strategy = StratStrategy::Merged;
    options.strat.partition_number = Some(3);
    let driver = solve(&tradeoff(), options);
    check_front!(driver, tradeoff_front());
}

#[test]
fn path_diversification_preserves_the_front() {
    let mut options = SearchOptions::default();
    options.path_diversification = true;
    let driver = solve(&tradeoff(), options);
    check_front!(driver, tradeoff_front());
}

#[test]
fn runs_are_deterministic() {
    let first = solve(&tradeoff(), SearchOptions::default());
    let second = solve(&tradeoff(), SearchOptions::default());
    assert_eq!(front_of(&first), front_of(&second));
    let wit_a: Vec<Vec<_>> = first
        .archive()
        .iter()
        .map(|e| e.sols().cloned().collect())
        .collect();
    let wit_b: Vec<Vec<_>> = second
        .archive()
        .iter()
        .map(|e| e.sols().cloned().collect())
        .collect();
    assert_eq!(wit_a, wit_b);
}

#[test]
fn empty_instance_yields_the_empty_placement() {
    let inst = instance(vec![], vec![], vec![], int(1));
    let driver = solve(&inst, SearchOptions::default());
    assert_eq!(driver.archive().len(), 1);
    let entry = driver.archive().iter().next().unwrap();
    assert_eq!(entry.costs.0, vec![int(0), int(0)]);
    assert!(entry.witness().is_empty());
}

#[test]
fn relaxations_turn_the_problem_into_bin_packing() {
    // infeasible as stated: the only allowed machine is too small and the
    // anti-colocated pair does not fit apart
    let mut first = vm(0, 0, 2, 2);
    first.allowed = vec![1];
    first.anti_colocatable = true;
    let mut second = vm(0, 1, 2, 2);
    second.allowed = vec![1];
    second.anti_colocatable = true;
    let inst = instance(
        vec![pm(0, 4, 4, 1, 3), pm(1, 2, 2, 1, 3)],
        vec![Job {
            id: 0,
            vms: vec![first, second],
        }],
        vec![],
        int(1),
    );
    let mut options = SearchOptions::default();
    options.encode.ignore_platform = true;
    options.encode.ignore_anti_colocation = true;
    let driver = solve(&inst, options);
    assert!(!driver.archive().is_empty());
}

#[test]
fn infeasible_platform_is_reported_at_encoding_time() {
    let mut stranded = vm(0, 0, 1, 1);
    stranded.allowed = vec![17];
    let inst = instance(
        vec![pm(0, 4, 4, 1, 3)],
        vec![Job {
            id: 0,
            vms: vec![stranded],
        }],
        vec![],
        int(1),
    );
    let res = Driver::new(inst, SearchOptions::default(), Oracle::default());
    assert!(matches!(
        res,
        Err(vmcwm_core::Error::InfeasibleInstance(_))
    ));
}

#[test]
fn lbx_with_hash_functions_is_rejected() {
    let mut options = SearchOptions::default();
    options.alg = Algorithm::ParetoLbx;
    options.encode.hash_functions = true;
    let res = Driver::new(singleton(), options, Oracle::default());
    assert!(matches!(res, Err(vmcwm_core::Error::InvalidConfig(_))));
}

#[test]
fn hash_enumeration_covers_the_space() {
    let mut options = SearchOptions::default();
    options.alg = Algorithm::HashEnum;
    options.encode.hash_functions = true;
    options.time_limit = Some(Duration::from_secs(30));
    let inst = singleton();
    let mut driver = Driver::new(inst, options, Oracle::default()).unwrap();
    match driver.solve() {
        Ok(()) | Err(Termination::Deadline) => (),
        Err(term) => panic!("unexpected termination: {term}"),
    }
    assert!(driver
        .archive()
        .iter()
        .any(|e| e.costs.0 == vec![rat(3, 2), int(0)]));
}

#[test]
fn hash_diversified_cld_preserves_the_front() {
    let mut options = SearchOptions::default();
    options.encode.hash_functions = true;
    options.time_limit = Some(Duration::from_secs(60));
    let mut driver = Driver::new(tradeoff(), options, Oracle::default()).unwrap();
    match driver.solve() {
        Ok(()) | Err(Termination::Deadline) => (),
        Err(term) => panic!("unexpected termination: {term}"),
    }
    for entry in driver.archive() {
        let costs: Vec<Rational64> = entry.costs.iter().copied().collect();
        assert!(tradeoff_front().contains(&costs));
    }
}

#[test]
fn expired_deadline_freezes_an_empty_archive() {
    let mut options = SearchOptions::default();
    options.time_limit = Some(Duration::from_secs(0));
    let mut driver = Driver::new(tradeoff(), options, Oracle::default()).unwrap();
    match driver.solve() {
        Err(Termination::Deadline) => (),
        other => panic!("expected deadline, got {other:?}"),
    }
    assert!(driver.archive().is_empty());
}

#[test]
fn smart_mutation_repairs_an_overflowing_candidate() {
    let inst = instance(
        vec![pm(0, 2, 2, 1, 2), pm(1, 2, 2, 1, 2)],
        vec![Job {
            id: 0,
            vms: vec![vm(0, 0, 2, 2), vm(0, 1, 2, 2)],
        }],
        vec![],
        int(1),
    );
    let candidate = Placement::new(vec![0, 0]);
    let opts = SmartOptions {
        max_conflicts: Some(100_000),
        domain_unfixing: true,
        improvement: None,
    };
    let mut total_distance = 0usize;
    let runs = 100;
    for seed in 0..runs {
        let mut driver = Driver::new(
            inst.clone(),
            SearchOptions {
                seed,
                ..SearchOptions::default()
            },
            Oracle::default(),
        )
        .unwrap();
        match driver.smart_mutation(&candidate, 0.5, &opts).unwrap() {
            vmcwm_core::SmartOutcome::Repaired(placement) => {
                assert!(inst.check(&placement));
                total_distance += placement.distance(&candidate);
            }
            other => panic!("expected a repair, got {other:?}"),
        }
    }
    // on average the repair moves at most ⌈ρ·n⌉ VMs
    assert!(total_distance as f64 / runs as f64 <= 1.0);
}

#[test]
fn smart_mutation_keeps_feasible_candidates() {
    let inst = tradeoff();
    let candidate = Placement::new(vec![1, 1, 1]);
    assert!(inst.check(&candidate));
    let mut driver =
        Driver::new(inst, SearchOptions::default(), Oracle::default()).unwrap();
    let opts = SmartOptions::default();
    assert_eq!(
        driver.smart_mutation(&candidate, 0.5, &opts).unwrap(),
        vmcwm_core::SmartOutcome::Unchanged
    );
}

#[test]
fn smart_mutation_discards_globally_infeasible_candidates() {
    // both VMs anti-colocated with a single machine available
    let mut vms = vec![vm(0, 0, 1, 1), vm(0, 1, 1, 1)];
    for vm in &mut vms {
        vm.anti_colocatable = true;
    }
    let inst = instance(vec![pm(0, 4, 4, 1, 3)], vec![Job { id: 0, vms }], vec![], int(1));
    let candidate = Placement::new(vec![0, 0]);
    let mut driver =
        Driver::new(inst, SearchOptions::default(), Oracle::default()).unwrap();
    let opts = SmartOptions {
        max_conflicts: None,
        domain_unfixing: true,
        improvement: None,
    };
    assert_eq!(
        driver.smart_mutation(&candidate, 0.5, &opts).unwrap(),
        vmcwm_core::SmartOutcome::Discard
    );
}

#[test]
fn smart_improvement_never_returns_a_dominated_neighbour() {
    let inst = instance(
        vec![pm(0, 4, 4, 1, 3), pm(1, 4, 4, 10, 12)],
        vec![Job {
            id: 0,
            vms: vec![vm(0, 0, 1, 1), vm(0, 1, 1, 1)],
        }],
        vec![],
        int(1),
    );
    let candidate = Placement::new(vec![0, 1]);
    assert!(inst.check(&candidate));
    let mut driver =
        Driver::new(inst.clone(), SearchOptions::default(), Oracle::default()).unwrap();
    let opts = SmartOptions {
        max_conflicts: None,
        domain_unfixing: true,
        improvement: Some(vmcwm_core::ImproveOptions {
            relax_rate: 1.0,
            ..vmcwm_core::ImproveOptions::default()
        }),
    };
    match driver.smart_mutation(&candidate, 0.5, &opts).unwrap() {
        vmcwm_core::SmartOutcome::Improved(placement) => {
            assert!(inst.check(&placement));
            let new = inst.evaluate(&placement, false);
            let old = inst.evaluate(&candidate, false);
            assert!(new.dominates(&old));
        }
        vmcwm_core::SmartOutcome::Unchanged => (),
        other => panic!("unexpected outcome: {other:?}"),
    }
}
