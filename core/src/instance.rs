//! # Instance Model
//!
//! The consolidation problem as typed numeric data: physical machines with
//! CPU/memory capacities and energy costs, jobs of virtual machines with
//! demands and constraint flags, the current allocation, and the migration
//! budget. The model also hosts the reference objective formulae; every
//! objective vector the search emits is computed here from a decoded
//! placement, never from encoding weights.

use num_rational::Rational64;
use num_traits::{Signed, Zero};

use crate::types::{Cost, CostVec, Placement, VmRef};

/// A physical machine. Capacities are integer resource units; energy costs
/// are exact rationals per §idle/full load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhysicalMachine {
    pub id: usize,
    pub cpu: i64,
    pub mem: i64,
    pub idle_energy: Rational64,
    pub full_energy: Rational64,
}

impl PhysicalMachine {
    /// Whether no VM can ever run here
    pub fn unusable(&self) -> bool {
        self.cpu == 0 || self.mem == 0
    }
}

/// A virtual machine. An empty `allowed` set means the VM may run on any
/// machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualMachine {
    pub job: usize,
    pub index: usize,
    pub cpu: i64,
    pub mem: i64,
    pub allowed: Vec<usize>,
    pub anti_colocatable: bool,
}

impl VirtualMachine {
    pub fn vm_ref(&self) -> VmRef {
        VmRef {
            job: self.job,
            index: self.index,
        }
    }

    pub fn allows(&self, pm_id: usize) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&pm_id)
    }
}

/// An ordered collection of virtual machines belonging to one job
#[derive(Clone, Debug)]
pub struct Job {
    pub id: usize,
    pub vms: Vec<VirtualMachine>,
}

/// One entry of the current allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub vm: VmRef,
    pub pm: usize,
}

/// Constraint violations a placement can exhibit, with the offending VMs by
/// global index. Consumed by the smart service's domain-based unfixing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    CpuCapacity { pm: usize, vms: Vec<usize> },
    MemCapacity { pm: usize, vms: Vec<usize> },
    Platform { vm: usize },
    AntiColocation { pm: usize, vms: Vec<usize> },
    MigrationBudget { vms: Vec<usize> },
}

impl Violation {
    /// Global indices of the VMs implicated in the violation
    pub fn vms(&self) -> &[usize] {
        match self {
            Violation::CpuCapacity { vms, .. }
            | Violation::MemCapacity { vms, .. }
            | Violation::AntiColocation { vms, .. }
            | Violation::MigrationBudget { vms } => vms,
            Violation::Platform { vm } => std::slice::from_ref(vm),
        }
    }
}

/// A full consolidation instance
#[derive(Clone, Debug)]
pub struct Instance {
    pms: Vec<PhysicalMachine>,
    jobs: Vec<Job>,
    mappings: Vec<Mapping>,
    migration_percentile: Rational64,
    /// Flat view of all VMs in global-index order
    vm_index: Vec<VmRef>,
    /// Positions of each VM in the jobs table, parallel to `vm_index`
    vm_locs: Vec<(usize, usize)>,
}

impl Instance {
    /// Bundles the instance data. Machine ids must equal their position;
    /// mappings must reference existing VMs and machines.
    pub fn new(
        pms: Vec<PhysicalMachine>,
        jobs: Vec<Job>,
        mappings: Vec<Mapping>,
        migration_percentile: Rational64,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            pms.iter().enumerate().all(|(idx, pm)| pm.id == idx),
            "physical machine ids must be consecutive from 0"
        );
        anyhow::ensure!(
            migration_percentile >= Rational64::zero()
                && migration_percentile <= Rational64::from_integer(1),
            "migration percentile must be within [0, 1]"
        );
        for pm in &pms {
            anyhow::ensure!(pm.cpu >= 0 && pm.mem >= 0, "machine capacities must be non-negative");
        }
        let mut vm_index = vec![];
        let mut vm_locs = vec![];
        for (job_pos, job) in jobs.iter().enumerate() {
            for (vm_pos, vm) in job.vms.iter().enumerate() {
                anyhow::ensure!(
                    vm.cpu > 0 && vm.mem > 0,
                    "VM demands must be positive (vm {})",
                    vm.vm_ref()
                );
                vm_index.push(vm.vm_ref());
                vm_locs.push((job_pos, vm_pos));
            }
        }
        let inst = Instance {
            pms,
            jobs,
            mappings,
            migration_percentile,
            vm_index,
            vm_locs,
        };
        for map in &inst.mappings {
            anyhow::ensure!(
                inst.global_index(map.vm).is_some(),
                "mapping references unknown VM {}",
                map.vm
            );
            anyhow::ensure!(
                map.pm < inst.pms.len(),
                "mapping references unknown machine {}",
                map.pm
            );
        }
        Ok(inst)
    }

    pub fn pms(&self) -> &[PhysicalMachine] {
        &self.pms
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn n_pms(&self) -> usize {
        self.pms.len()
    }

    pub fn n_vms(&self) -> usize {
        self.vm_index.len()
    }

    /// Iterates all VMs in global-index order
    pub fn vms(&self) -> impl Iterator<Item = &VirtualMachine> {
        self.jobs.iter().flat_map(|job| job.vms.iter())
    }

    /// The VM with the given global index
    pub fn vm(&self, idx: usize) -> &VirtualMachine {
        let (job_pos, vm_pos) = self.vm_locs[idx];
        &self.jobs[job_pos].vms[vm_pos]
    }

    /// Resolves a composite key to a global index
    pub fn global_index(&self, vm: VmRef) -> Option<usize> {
        self.vm_index.iter().position(|&v| v == vm)
    }

    /// Whether the instance carries a current allocation (and therefore a
    /// migration objective)
    pub fn has_mappings(&self) -> bool {
        !self.mappings.is_empty()
    }

    /// Number of objectives the search reports for this instance
    pub fn n_objectives(&self) -> usize {
        if self.has_mappings() {
            3
        } else {
            2
        }
    }

    /// The machine the VM with the given global index is currently mapped to
    pub fn current_pm(&self, vm_idx: usize) -> Option<usize> {
        let vmr = self.vm_index[vm_idx];
        self.mappings.iter().find(|m| m.vm == vmr).map(|m| m.pm)
    }

    pub fn total_mem_capacity(&self) -> i64 {
        self.pms.iter().map(|pm| pm.mem).sum()
    }

    /// Maximum total memory of migrating VMs: `percentile × total memory`,
    /// rounded down to whole memory units
    pub fn migration_budget(&self) -> i64 {
        (self.migration_percentile * Rational64::from_integer(self.total_mem_capacity())).floor().to_integer()
    }

    pub fn migration_percentile(&self) -> Rational64 {
        self.migration_percentile
    }

    /// Strips allowed-machine restrictions from every VM
    pub fn discard_platform_constraints(&mut self) {
        for job in &mut self.jobs {
            for vm in &mut job.vms {
                vm.allowed.clear();
            }
        }
    }

    /// Strips anti-colocation constraints from every VM
    pub fn discard_anti_colocation_constraints(&mut self) {
        for job in &mut self.jobs {
            for vm in &mut job.vms {
                vm.anti_colocatable = false;
            }
        }
    }

    fn usage_per_pm(&self, placement: &Placement) -> Vec<(i64, i64)> {
        let mut usage = vec![(0i64, 0i64); self.pms.len()];
        for (vm_idx, pm) in placement.iter() {
            let vm = self.vm(vm_idx);
            usage[pm].0 += vm.cpu;
            usage[pm].1 += vm.mem;
        }
        usage
    }

    /// Total energy cost: for each hosting machine, `idle + utilization ×
    /// (full − idle)` with utilization the CPU usage fraction
    pub fn energy(&self, placement: &Placement) -> Cost {
        let usage = self.usage_per_pm(placement);
        let mut energy = Cost::zero();
        for (pm, &(cpu_used, mem_used)) in self.pms.iter().zip(&usage) {
            if cpu_used == 0 && mem_used == 0 {
                continue;
            }
            let util = if pm.cpu > 0 {
                Rational64::new(cpu_used, pm.cpu)
            } else {
                Rational64::from_integer(1)
            };
            energy += pm.idle_energy + util * (pm.full_energy - pm.idle_energy);
        }
        energy
    }

    /// Total resource wastage: for each hosting machine, the imbalance
    /// between leftover CPU and leftover memory divided by the utilized
    /// resources. With `ignore_denominators`, the division is dropped.
    pub fn wastage(&self, placement: &Placement, ignore_denominators: bool) -> Cost {
        let usage = self.usage_per_pm(placement);
        let mut wastage = Cost::zero();
        for (pm, &(cpu_used, mem_used)) in self.pms.iter().zip(&usage) {
            if cpu_used == 0 && mem_used == 0 {
                continue;
            }
            let imbalance =
                Rational64::from_integer((pm.cpu - cpu_used) - (pm.mem - mem_used)).abs();
            if ignore_denominators {
                wastage += imbalance;
            } else {
                wastage += imbalance / Rational64::from_integer(cpu_used + mem_used);
            }
        }
        wastage
    }

    /// Total memory moved with respect to the current allocation
    pub fn migration(&self, placement: &Placement) -> Cost {
        let mut moved = 0i64;
        for map in &self.mappings {
            let vm_idx = self
                .global_index(map.vm)
                .expect("mapping validated at construction");
            if placement.pm(vm_idx) != map.pm {
                moved += self.vm(vm_idx).mem;
            }
        }
        Cost::from_integer(moved)
    }

    /// Evaluates a placement with the reference formulae. The vector carries
    /// the migration component only when the instance has a current
    /// allocation.
    pub fn evaluate(&self, placement: &Placement, ignore_den_eval: bool) -> CostVec {
        debug_assert_eq!(placement.len(), self.n_vms());
        let mut costs = vec![
            self.energy(placement),
            self.wastage(placement, ignore_den_eval),
        ];
        if self.has_mappings() {
            costs.push(self.migration(placement));
        }
        CostVec(costs)
    }

    /// Collects every hard-constraint violation of a placement
    pub fn violations(&self, placement: &Placement) -> Vec<Violation> {
        let mut violations = vec![];
        let usage = self.usage_per_pm(placement);
        for (pm, &(cpu_used, mem_used)) in self.pms.iter().zip(&usage) {
            let hosted: Vec<usize> = placement
                .iter()
                .filter(|&(_, p)| p == pm.id)
                .map(|(v, _)| v)
                .collect();
            if cpu_used > pm.cpu {
                violations.push(Violation::CpuCapacity {
                    pm: pm.id,
                    vms: hosted.clone(),
                });
            }
            if mem_used > pm.mem {
                violations.push(Violation::MemCapacity {
                    pm: pm.id,
                    vms: hosted.clone(),
                });
            }
        }
        for (vm_idx, pm) in placement.iter() {
            if !self.vm(vm_idx).allows(pm) {
                violations.push(Violation::Platform { vm: vm_idx });
            }
        }
        // Anti-colocated VMs of one job must occupy distinct machines
        for job in &self.jobs {
            for pm in 0..self.pms.len() {
                let clashing: Vec<usize> = job
                    .vms
                    .iter()
                    .filter(|vm| vm.anti_colocatable)
                    .filter_map(|vm| self.global_index(vm.vm_ref()))
                    .filter(|&idx| placement.pm(idx) == pm)
                    .collect();
                if clashing.len() > 1 {
                    violations.push(Violation::AntiColocation { pm, vms: clashing });
                }
            }
        }
        if self.has_mappings() {
            let moved: Vec<usize> = self
                .mappings
                .iter()
                .filter_map(|m| {
                    let idx = self.global_index(m.vm)?;
                    (placement.pm(idx) != m.pm).then_some(idx)
                })
                .collect();
            let moved_mem: i64 = moved.iter().map(|&idx| self.vm(idx).mem).sum();
            if moved_mem > self.migration_budget() {
                violations.push(Violation::MigrationBudget { vms: moved });
            }
        }
        violations
    }

    /// Whether a placement satisfies every hard constraint
    pub fn check(&self, placement: &Placement) -> bool {
        placement.len() == self.n_vms()
            && placement.iter().all(|(_, pm)| pm < self.pms.len())
            && self.violations(placement).is_empty()
    }
}

/// Aggregate figures printed by the driver before solving
#[derive(Clone, Copy, Debug)]
pub struct ProblemStats {
    pub n_pms: usize,
    pub n_jobs: usize,
    pub n_vms: usize,
    pub n_mappings: usize,
    pub total_cpu_capacity: i64,
    pub total_mem_capacity: i64,
    pub total_cpu_demand: i64,
    pub total_mem_demand: i64,
    pub migration_budget: i64,
}

impl ProblemStats {
    pub fn of(inst: &Instance) -> Self {
        ProblemStats {
            n_pms: inst.n_pms(),
            n_jobs: inst.jobs().len(),
            n_vms: inst.n_vms(),
            n_mappings: inst.mappings().len(),
            total_cpu_capacity: inst.pms().iter().map(|pm| pm.cpu).sum(),
            total_mem_capacity: inst.total_mem_capacity(),
            total_cpu_demand: inst.vms().map(|vm| vm.cpu).sum(),
            total_mem_demand: inst.vms().map(|vm| vm.mem).sum(),
            migration_budget: inst.migration_budget(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn singleton() -> Instance {
        Instance::new(
            vec![pm(0, 4, 4, 1, 3)],
            vec![Job {
                id: 0,
                vms: vec![vm(0, 0, 1, 1)],
            }],
            vec![],
            Rational64::from_integer(1),
        )
        .unwrap()
    }

    #[test]
    fn energy_counts_hosting_machines_only() {
        let inst = singleton();
        let energy = inst.energy(&Placement::new(vec![0]));
        // idle + 1/4 * (full - idle) = 1 + 1/2
        assert_eq!(energy, Rational64::new(3, 2));
    }

    #[test]
    fn wastage_of_balanced_machine_is_zero() {
        let inst = singleton();
        assert_eq!(
            inst.wastage(&Placement::new(vec![0]), false),
            Rational64::zero()
        );
    }

    #[test]
    fn migration_charges_moved_memory() {
        let mut inst = singleton();
        inst = Instance::new(
            inst.pms().to_vec(),
            inst.jobs().to_vec(),
            vec![Mapping {
                vm: VmRef { job: 0, index: 0 },
                pm: 0,
            }],
            Rational64::from_integer(1),
        )
        .unwrap();
        assert_eq!(inst.migration(&Placement::new(vec![0])), Cost::zero());
        let two_pm = Instance::new(
            vec![pm(0, 4, 4, 1, 3), pm(1, 4, 4, 1, 3)],
            inst.jobs().to_vec(),
            inst.mappings().to_vec(),
            Rational64::from_integer(1),
        )
        .unwrap();
        assert_eq!(
            two_pm.migration(&Placement::new(vec![1])),
            Cost::from_integer(1)
        );
    }

    #[test]
    fn violations_flag_overfull_machines() {
        let inst = Instance::new(
            vec![pm(0, 2, 2, 1, 2)],
            vec![Job {
                id: 0,
                vms: vec![vm(0, 0, 2, 2), vm(0, 1, 2, 2)],
            }],
            vec![],
            Rational64::from_integer(1),
        )
        .unwrap();
        let placement = Placement::new(vec![0, 0]);
        assert!(!inst.check(&placement));
        let viols = inst.violations(&placement);
        assert!(viols
            .iter()
            .any(|v| matches!(v, Violation::CpuCapacity { pm: 0, .. })));
    }

    #[test]
    fn zero_budget_pins_mapped_vms() {
        let inst = Instance::new(
            vec![pm(0, 4, 4, 1, 3), pm(1, 4, 4, 1, 3)],
            vec![Job {
                id: 0,
                vms: vec![vm(0, 0, 1, 1)],
            }],
            vec![Mapping {
                vm: VmRef { job: 0, index: 0 },
                pm: 0,
            }],
            Rational64::zero(),
        )
        .unwrap();
        assert!(inst.check(&Placement::new(vec![0])));
        assert!(!inst.check(&Placement::new(vec![1])));
    }
}
