//! # Pseudo-Boolean Encoding
//!
//! Translates an instance plus encoder switches into a pseudo-Boolean
//! constraint system with linear objective functions. Satisfying assignments
//! of the hard set are in bijection with feasible placements; the variable
//! layout is deterministic for a given instance and option set.
//!
//! Layout: `x[v][p]` ("VM v runs on machine p") in row-major VM order, then
//! one usage indicator `y[p]` per machine, then auxiliary variables in fixed
//! emission order (wastage sign selectors and conjunction variables first,
//! followed by whatever the downstream CNF conversion allocates).

use std::io::Write;

use num_rational::Rational64;
use num_traits::ToPrimitive;
use rustsat::{
    clause,
    instances::{BasicVarManager, Cnf, ManageVars, SatInstance},
    types::{
        constraints::{CardConstraint, PbConstraint},
        Assignment, Clause, Lit, TernaryVal, Var,
    },
};

use crate::{
    instance::Instance,
    objective::{ObjKind, RationalObjective},
    options::EncodeOptions,
    types::Placement,
    Error,
};

/// Deterministic mapping between problem entities and solver variables
#[derive(Clone, Copy, Debug)]
pub struct VarMap {
    n_vms: usize,
    n_pms: usize,
}

impl VarMap {
    pub fn new(n_vms: usize, n_pms: usize) -> Self {
        VarMap { n_vms, n_pms }
    }

    /// The placement variable "VM `vm` runs on machine `pm`"
    pub fn x(&self, vm: usize, pm: usize) -> Var {
        debug_assert!(vm < self.n_vms && pm < self.n_pms);
        Var::new((vm * self.n_pms + pm) as u32)
    }

    /// The usage indicator of machine `pm`
    pub fn y(&self, pm: usize) -> Var {
        debug_assert!(pm < self.n_pms);
        Var::new((self.n_vms * self.n_pms + pm) as u32)
    }

    /// Number of placement and usage variables
    pub fn n_base_vars(&self) -> usize {
        self.n_vms * self.n_pms + self.n_pms
    }

    /// All placement variables, in layout order. This is the default support
    /// of hash constraints.
    pub fn x_vars(&self) -> impl Iterator<Item = Var> + '_ {
        (0..self.n_vms * self.n_pms).map(|idx| Var::new(idx as u32))
    }

    /// Extracts the placement from a model of the hard constraints
    pub fn decode(&self, sol: &Assignment) -> anyhow::Result<Placement> {
        let mut assignment = Vec::with_capacity(self.n_vms);
        for vm in 0..self.n_vms {
            let hosts: Vec<usize> = (0..self.n_pms)
                .filter(|&pm| sol.var_value(self.x(vm, pm)) == TernaryVal::True)
                .collect();
            anyhow::ensure!(
                hosts.len() == 1,
                "model assigns VM {} to {} machines",
                vm,
                hosts.len()
            );
            assignment.push(hosts[0]);
        }
        Ok(Placement::new(assignment))
    }

    /// The positive placement literals of a placement, in VM order
    pub fn placement_lits(&self, placement: &Placement) -> Vec<Lit> {
        placement
            .iter()
            .map(|(vm, pm)| self.x(vm, pm).pos_lit())
            .collect()
    }
}

/// A hard constraint in its pre-clausal form. Kept structured so the same
/// data serves both the CNF conversion and the OPB dump.
#[derive(Clone, Debug)]
pub(crate) enum Hard {
    Clause(Clause),
    CardEq { lits: Vec<Lit>, bound: usize },
    CardUb { lits: Vec<Lit>, bound: usize },
    PbUb { terms: Vec<(Lit, i64)>, bound: i64 },
}

/// The encoded problem: hard constraints, objectives, and the variable map
#[derive(Clone, Debug)]
pub struct Encoding {
    pub(crate) hards: Vec<Hard>,
    pub map: VarMap,
    /// Variable manager positioned after all base and auxiliary variables
    var_manager: BasicVarManager,
    pub energy: RationalObjective,
    pub wastage_num: RationalObjective,
    pub wastage_den: Option<RationalObjective>,
    pub migration: Option<RationalObjective>,
}

impl Encoding {
    /// Highest variable of the base layout, if any
    pub fn max_base_var(&self) -> Option<Var> {
        match self.map.n_base_vars() {
            0 => None,
            n => Some(Var::new(n as u32 - 1)),
        }
    }

    pub fn n_hards(&self) -> usize {
        self.hards.len()
    }

    /// Converts the hard constraints to CNF with the default cardinality and
    /// pseudo-Boolean encoders. Returns the CNF together with the variable
    /// manager accounting for the encoder's auxiliary variables.
    pub fn to_cnf(&self) -> anyhow::Result<(Cnf, BasicVarManager)> {
        let mut sat: SatInstance<BasicVarManager> =
            SatInstance::new_with_manager(self.var_manager.clone());
        for hard in &self.hards {
            match hard {
                Hard::Clause(cl) => sat.add_clause(cl.clone()),
                Hard::CardEq { lits, bound } => {
                    sat.add_card_constr(CardConstraint::new_eq(lits.iter().copied(), *bound))
                }
                Hard::CardUb { lits, bound } => {
                    sat.add_card_constr(CardConstraint::new_ub(lits.iter().copied(), *bound))
                }
                Hard::PbUb { terms, bound } => sat.add_pb_constr(PbConstraint::new_ub(
                    terms.iter().map(|&(l, w)| (l, w as isize)),
                    *bound as isize,
                )),
            }
        }
        let (cnf, vm) = sat.into_cnf();
        Ok((cnf, vm))
    }

    /// The search objectives in canonical order
    pub fn objectives(&self) -> Vec<&RationalObjective> {
        let mut objs = vec![&self.energy, &self.wastage_num];
        if let Some(den) = &self.wastage_den {
            objs.push(den);
        }
        if let Some(mig) = &self.migration {
            objs.push(mig);
        }
        objs
    }

    /// Serialises the encoded problem as a multi-objective OPB file with one
    /// `min:` line per objective. Without `allow_decimals`, rational
    /// coefficients are cleared by common multiplication.
    pub fn dump_moco<W: Write>(&self, writer: &mut W, allow_decimals: bool) -> anyhow::Result<()> {
        writeln!(
            writer,
            "* #variable= {} #constraint= {}",
            self.map.n_base_vars(),
            self.hards.len()
        )?;
        for obj in self.objectives() {
            write!(writer, "min:")?;
            if allow_decimals {
                for (l, w) in obj.iter() {
                    let (var, coeff) = normalize_term_f64(l, w.to_f64().unwrap_or(f64::NAN));
                    write!(writer, " {:+} x{}", coeff, var.idx() + 1)?;
                }
            } else {
                let reduced = obj.reduce()?;
                for (l, w) in &reduced.lits {
                    let (var, coeff) = normalize_term(*l, *w as i64);
                    write!(writer, " {:+} x{}", coeff, var.idx() + 1)?;
                }
            }
            writeln!(writer, " ;")?;
        }
        for hard in &self.hards {
            self.write_hard(writer, hard)?;
        }
        Ok(())
    }

    fn write_hard<W: Write>(&self, writer: &mut W, hard: &Hard) -> anyhow::Result<()> {
        match hard {
            Hard::Clause(cl) => {
                // a clause is a lower bound of one on its literal sum
                let mut rhs = 1i64;
                for l in cl.iter() {
                    let (var, coeff) = normalize_term(*l, 1);
                    if coeff < 0 {
                        rhs += coeff;
                    }
                    write!(writer, "{:+} x{} ", coeff, var.idx() + 1)?;
                }
                writeln!(writer, ">= {rhs} ;")?;
            }
            Hard::CardEq { lits, bound } => {
                let mut rhs = *bound as i64;
                for l in lits {
                    let (var, coeff) = normalize_term(*l, 1);
                    if coeff < 0 {
                        rhs += coeff;
                    }
                    write!(writer, "{:+} x{} ", coeff, var.idx() + 1)?;
                }
                writeln!(writer, "= {rhs} ;")?;
            }
            Hard::CardUb { lits, bound } => {
                // upper bounds become negated lower bounds
                let mut rhs = -(*bound as i64);
                for l in lits {
                    let (var, coeff) = normalize_term(*l, -1);
                    if coeff < 0 {
                        rhs += coeff;
                    }
                    write!(writer, "{:+} x{} ", coeff, var.idx() + 1)?;
                }
                writeln!(writer, ">= {rhs} ;")?;
            }
            Hard::PbUb { terms, bound } => {
                let mut rhs = -bound;
                for &(l, w) in terms {
                    let (var, coeff) = normalize_term(l, -w);
                    if coeff < 0 {
                        rhs += coeff;
                    }
                    write!(writer, "{:+} x{} ", coeff, var.idx() + 1)?;
                }
                writeln!(writer, ">= {rhs} ;")?;
            }
        }
        Ok(())
    }
}

/// Rewrites a weighted literal onto its variable: `w·¬x = w − w·x`. Returns
/// the variable and the signed coefficient; the constant lands on the
/// caller's right-hand side (negative coefficients signal it).
fn normalize_term(lit: Lit, weight: i64) -> (Var, i64) {
    if lit.is_pos() {
        (lit.var(), weight)
    } else {
        (lit.var(), -weight)
    }
}

fn normalize_term_f64(lit: Lit, weight: f64) -> (Var, f64) {
    if lit.is_pos() {
        (lit.var(), weight)
    } else {
        (lit.var(), -weight)
    }
}

/// Encodes an instance into a pseudo-Boolean constraint system with linear
/// objectives. Fails fast on instances that cannot have any feasible
/// placement.
pub fn encode(inst: &Instance, opts: EncodeOptions) -> Result<Encoding, Error> {
    let n = inst.n_vms();
    let m = inst.n_pms();
    let map = VarMap::new(n, m);

    // the allowed machine set per VM, after the platform switch
    let mut allowed: Vec<Vec<usize>> = Vec::with_capacity(n);
    for (vm_idx, vm) in inst.vms().enumerate() {
        let set: Vec<usize> = (0..m)
            .filter(|&pm| opts.ignore_platform || vm.allows(pm))
            .collect();
        if set.is_empty() {
            return Err(Error::InfeasibleInstance(format!(
                "VM {} has no machine it is allowed to run on",
                inst.vm(vm_idx).vm_ref()
            )));
        }
        allowed.push(set);
    }
    let total_cpu: i64 = inst.pms().iter().map(|pm| pm.cpu).sum();
    let total_mem: i64 = inst.pms().iter().map(|pm| pm.mem).sum();
    let demand_cpu: i64 = inst.vms().map(|vm| vm.cpu).sum();
    let demand_mem: i64 = inst.vms().map(|vm| vm.mem).sum();
    if demand_cpu > total_cpu || demand_mem > total_mem {
        return Err(Error::InfeasibleInstance(
            "total demand exceeds total capacity".to_string(),
        ));
    }

    let mut var_manager = BasicVarManager::default();
    var_manager.increase_next_free(Var::new(map.n_base_vars() as u32));

    let mut hards = vec![];

    // platform restrictions as unit clauses
    for vm_idx in 0..n {
        for pm in 0..m {
            if !allowed[vm_idx].contains(&pm) {
                hards.push(Hard::Clause(clause![map.x(vm_idx, pm).neg_lit()]));
            }
        }
    }

    // exactly one machine per VM
    for vm_idx in 0..n {
        let lits: Vec<Lit> = allowed[vm_idx]
            .iter()
            .map(|&pm| map.x(vm_idx, pm).pos_lit())
            .collect();
        if lits.len() == 1 {
            hards.push(Hard::Clause(Clause::from_iter(lits)));
        } else {
            hards.push(Hard::CardEq { lits, bound: 1 });
        }
    }

    // capacities
    for pm in inst.pms() {
        let hosted: Vec<usize> = (0..n).filter(|&v| allowed[v].contains(&pm.id)).collect();
        if hosted.is_empty() {
            continue;
        }
        for (demand, cap) in [
            (
                hosted
                    .iter()
                    .map(|&v| (map.x(v, pm.id).pos_lit(), inst.vm(v).cpu))
                    .collect::<Vec<_>>(),
                pm.cpu,
            ),
            (
                hosted
                    .iter()
                    .map(|&v| (map.x(v, pm.id).pos_lit(), inst.vm(v).mem))
                    .collect::<Vec<_>>(),
                pm.mem,
            ),
        ] {
            if demand.iter().map(|&(_, w)| w).sum::<i64>() > cap {
                hards.push(Hard::PbUb {
                    terms: demand,
                    bound: cap,
                });
            }
        }
    }

    // anti-colocated VMs of one job occupy distinct machines
    if !opts.ignore_anti_colocation {
        for job in inst.jobs() {
            for pm in 0..m {
                let lits: Vec<Lit> = job
                    .vms
                    .iter()
                    .filter(|vm| vm.anti_colocatable)
                    .filter_map(|vm| inst.global_index(vm.vm_ref()))
                    .filter(|&v| allowed[v].contains(&pm))
                    .map(|v| map.x(v, pm).pos_lit())
                    .collect();
                if lits.len() > 1 {
                    hards.push(Hard::CardUb { lits, bound: 1 });
                }
            }
        }
    }

    // usage indicators: y[p] holds exactly when some VM is placed on p
    for pm in 0..m {
        let hosted: Vec<usize> = (0..n).filter(|&v| allowed[v].contains(&pm)).collect();
        for &v in &hosted {
            hards.push(Hard::Clause(clause![
                map.x(v, pm).neg_lit(),
                map.y(pm).pos_lit()
            ]));
        }
        let mut support = Clause::new();
        support.add(map.y(pm).neg_lit());
        for &v in &hosted {
            support.add(map.x(v, pm).pos_lit());
        }
        hards.push(Hard::Clause(support));
    }

    // migration budget over the current allocation
    if inst.has_mappings() {
        let budget = inst.migration_budget();
        let terms: Vec<(Lit, i64)> = (0..n)
            .filter_map(|v| {
                let cur = inst.current_pm(v)?;
                Some((map.x(v, cur).neg_lit(), inst.vm(v).mem))
            })
            .collect();
        if terms.iter().map(|&(_, w)| w).sum::<i64>() > budget {
            hards.push(Hard::PbUb {
                terms,
                bound: budget,
            });
        }
    }

    // lex usage ordering over capacity/cost-identical machines
    if opts.symmetry_breaking {
        for group in identical_groups(inst) {
            for pair in group.windows(2) {
                hards.push(Hard::Clause(clause![
                    map.y(pair[1]).neg_lit(),
                    map.y(pair[0]).pos_lit()
                ]));
            }
        }
    }

    // energy: idle cost per used machine plus utilization-proportional load
    let mut energy = RationalObjective::new(ObjKind::Energy);
    for pm in inst.pms() {
        if pm.unusable() {
            continue;
        }
        energy.add_term(map.y(pm.id).pos_lit(), pm.idle_energy);
        let span = pm.full_energy - pm.idle_energy;
        for (v, set) in allowed.iter().enumerate() {
            if set.contains(&pm.id) {
                energy.add_term(
                    map.x(v, pm.id).pos_lit(),
                    span * Rational64::new(inst.vm(v).cpu, pm.cpu),
                );
            }
        }
    }

    // wastage numerator: |leftover cpu − leftover mem| per used machine,
    // linearized with a sign selector and conjunction variables
    let mut wastage_num = RationalObjective::new(ObjKind::WastageNum);
    for pm in inst.pms() {
        if pm.unusable() {
            continue;
        }
        let hosted: Vec<usize> = (0..n).filter(|&v| allowed[v].contains(&pm.id)).collect();
        if hosted.is_empty() {
            continue;
        }
        let k = pm.cpu - pm.mem;
        let diffs: Vec<(usize, i64)> = hosted
            .iter()
            .map(|&v| (v, inst.vm(v).cpu - inst.vm(v).mem))
            .filter(|&(_, a)| a != 0)
            .collect();
        if k == 0 && diffs.is_empty() {
            continue;
        }
        let big_m: i64 = k.abs() + diffs.iter().map(|&(_, a)| a.abs()).sum::<i64>();
        let sign = var_manager.new_var().pos_lit();

        // sign true forces a non-negative leftover difference, false the
        // converse: diff = k·y − Σ a_v·x
        let mut le_terms: Vec<(Lit, i64)> = vec![(map.y(pm.id).pos_lit(), -k), (sign, big_m)];
        let mut ge_terms: Vec<(Lit, i64)> = vec![(map.y(pm.id).pos_lit(), k), (sign, -big_m)];
        for &(v, a) in &diffs {
            le_terms.push((map.x(v, pm.id).pos_lit(), a));
            ge_terms.push((map.x(v, pm.id).pos_lit(), -a));
        }
        hards.push(Hard::PbUb {
            terms: le_terms,
            bound: big_m,
        });
        hards.push(Hard::PbUb {
            terms: ge_terms,
            bound: 0,
        });

        // |diff| as a weighted sum over sign∧y, ¬sign∧y, sign∧x, ¬sign∧x
        if k != 0 {
            let pos = conjunction(&mut hards, &mut var_manager, sign, map.y(pm.id).pos_lit());
            let neg = conjunction(&mut hards, &mut var_manager, !sign, map.y(pm.id).pos_lit());
            wastage_num.add_term(pos, Rational64::from_integer(k));
            wastage_num.add_term(neg, Rational64::from_integer(-k));
        }
        for &(v, a) in &diffs {
            let x = map.x(v, pm.id).pos_lit();
            let pos = conjunction(&mut hards, &mut var_manager, sign, x);
            let neg = conjunction(&mut hards, &mut var_manager, !sign, x);
            wastage_num.add_term(pos, Rational64::from_integer(-a));
            wastage_num.add_term(neg, Rational64::from_integer(a));
        }
    }

    // wastage denominator proxy: powered-on capacity, to be maximised by
    // minimizing its complement
    let wastage_den = if opts.ignore_denominators {
        None
    } else {
        let mut den = RationalObjective::new(ObjKind::WastageDen);
        for pm in inst.pms() {
            if pm.unusable() {
                continue;
            }
            den.add_term(
                map.y(pm.id).pos_lit(),
                Rational64::from_integer(pm.cpu + pm.mem),
            );
        }
        Some(den)
    };

    // migration: memory of every VM leaving its current machine
    let migration = if inst.has_mappings() {
        let mut mig = RationalObjective::new(ObjKind::Migration);
        for v in 0..n {
            if let Some(cur) = inst.current_pm(v) {
                mig.add_term(
                    map.x(v, cur).neg_lit(),
                    Rational64::from_integer(inst.vm(v).mem),
                );
            }
        }
        Some(mig)
    } else {
        None
    };

    Ok(Encoding {
        hards,
        map,
        var_manager,
        energy,
        wastage_num,
        wastage_den,
        migration,
    })
}

/// Defines `out ↔ a ∧ b` over a fresh variable
fn conjunction(
    hards: &mut Vec<Hard>,
    vm: &mut BasicVarManager,
    a: Lit,
    b: Lit,
) -> Lit {
    let out = vm.new_var().pos_lit();
    hards.push(Hard::Clause(clause![!out, a]));
    hards.push(Hard::Clause(clause![!out, b]));
    hards.push(Hard::Clause(clause![out, !a, !b]));
    out
}

/// Groups of machines sharing identical capacities and energy costs, in id
/// order. Only groups of at least two matter for symmetry breaking.
fn identical_groups(inst: &Instance) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = vec![];
    for pm in inst.pms() {
        match groups.iter_mut().find(|g| {
            let head = &inst.pms()[g[0]];
            head.cpu == pm.cpu
                && head.mem == pm.mem
                && head.idle_energy == pm.idle_energy
                && head.full_energy == pm.full_energy
        }) {
            Some(group) => group.push(pm.id),
            None => groups.push(vec![pm.id]),
        }
    }
    groups.retain(|g| g.len() > 1);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Job, PhysicalMachine, VirtualMachine};

    fn inst(pms: Vec<(i64, i64)>, vms: Vec<(i64, i64)>) -> Instance {
        let pms = pms
            .into_iter()
            .enumerate()
            .map(|(id, (cpu, mem))| PhysicalMachine {
                id,
                cpu,
                mem,
                idle_energy: Rational64::from_integer(1),
                full_energy: Rational64::from_integer(3),
            })
            .collect();
        let vms = vms
            .into_iter()
            .enumerate()
            .map(|(index, (cpu, mem))| VirtualMachine {
                job: 0,
                index,
                cpu,
                mem,
                allowed: vec![],
                anti_colocatable: false,
            })
            .collect();
        Instance::new(
            pms,
            vec![Job { id: 0, vms }],
            vec![],
            Rational64::from_integer(1),
        )
        .unwrap()
    }

    #[test]
    fn variable_layout_is_deterministic() {
        let map = VarMap::new(2, 3);
        assert_eq!(map.x(0, 0), Var::new(0));
        assert_eq!(map.x(1, 2), Var::new(5));
        assert_eq!(map.y(0), Var::new(6));
        assert_eq!(map.n_base_vars(), 9);
    }

    #[test]
    fn empty_allowed_set_is_infeasible() {
        let mut instance = inst(vec![(4, 4), (4, 4)], vec![(1, 1)]);
        let mut jobs = instance.jobs().to_vec();
        jobs[0].vms[0].allowed = vec![7];
        instance = Instance::new(
            instance.pms().to_vec(),
            jobs,
            vec![],
            Rational64::from_integer(1),
        )
        .unwrap();
        assert!(matches!(
            encode(&instance, EncodeOptions::default()),
            Err(Error::InfeasibleInstance(_))
        ));
    }

    #[test]
    fn overloaded_instance_is_infeasible() {
        let instance = inst(vec![(1, 1)], vec![(2, 2)]);
        assert!(matches!(
            encode(&instance, EncodeOptions::default()),
            Err(Error::InfeasibleInstance(_))
        ));
    }

    #[test]
    fn denominator_objective_follows_switch() {
        let instance = inst(vec![(4, 4)], vec![(1, 1)]);
        let enc = encode(&instance, EncodeOptions::default()).unwrap();
        assert!(enc.wastage_den.is_some());
        let enc = encode(
            &instance,
            EncodeOptions {
                ignore_denominators: true,
                ..EncodeOptions::default()
            },
        )
        .unwrap();
        assert!(enc.wastage_den.is_none());
        assert!(enc.migration.is_none());
    }

    #[test]
    fn moco_dump_has_one_min_line_per_objective() {
        let instance = inst(vec![(4, 4), (2, 8)], vec![(1, 1), (1, 2)]);
        let enc = encode(&instance, EncodeOptions::default()).unwrap();
        let mut out = vec![];
        enc.dump_moco(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("min:")).count(), 3);
        assert!(text.lines().any(|l| l.ends_with("= 1 ;")));
    }
}
