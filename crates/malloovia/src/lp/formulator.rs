//! Builders of the Phase I / Phase II programs.
//!
//! A formulator is a pure function of the problem, the load levels to cover,
//! the optional fixed reserved allocation (Phase II) and the optional guided
//! lower bounds. It produces a [`Formulation`] plus the index maps needed to
//! read the solved variables back.

use std::collections::HashMap;

use itertools::iproduct;

use crate::histogram::LoadLevel;
use crate::lp::{ConstraintSense, Formulation, ObjectiveSense, VarId};
use crate::model::{LimitingSet, Problem, TimeUnit};
use crate::solution::ReservedAllocation;

/// What the program optimizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Goal {
    /// Minimize the monetary cost while serving every workload level.
    MinimizeCost,
    /// Maximize the served workload fraction without exceeding it. Used as
    /// the Phase II fallback when the nominal single-timeslot program is
    /// infeasible.
    MaximizeServedFraction,
}

/// Minimum number of on-demand VMs to keep running, per (instance class,
/// app). Applied as lower bounds on the on-demand variables of the nominal
/// Phase II program.
#[derive(Clone, Debug, Default)]
pub struct GuidedBounds {
    bounds: HashMap<(String, String), u64>,
}

impl GuidedBounds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, ic_id: &str, app_id: &str, min_vms: u64) {
        self.bounds
            .insert((ic_id.to_string(), app_id.to_string()), min_vms);
    }

    pub fn get(&self, ic_id: &str, app_id: &str) -> u64 {
        self.bounds
            .get(&(ic_id.to_string(), app_id.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// Everything a formulation run needs to know.
pub struct LpSpec<'a> {
    pub problem: &'a Problem,
    /// Load levels to cover. Phase I passes the whole histogram, Phase II a
    /// single tuple.
    pub levels: &'a [LoadLevel],
    /// Repetition count of each level. Phase II passes `[1]`.
    pub repeats: &'a [u64],
    /// Fixed reserved pool from Phase I, constraining each reserved class
    /// total to its purchased number.
    pub reserved: Option<&'a ReservedAllocation>,
    pub guided: Option<&'a GuidedBounds>,
    pub goal: Goal,
}

/// Index maps tying formulation variables back to the problem entities.
pub struct VarMaps {
    /// Indices into `problem.instance_classes` of the reserved classes, in
    /// problem order.
    pub reserved: Vec<usize>,
    /// Indices of the on-demand classes, in problem order.
    pub ondemand: Vec<usize>,
    /// `y[r][a]`: reserved VMs of class `reserved[r]` dedicated to app `a`
    /// for the whole period.
    pub y: Vec<Vec<VarId>>,
    /// `x[l][d][a]`: on-demand VMs of class `ondemand[d]` serving app `a`
    /// during load level `l`.
    pub x: Vec<Vec<Vec<VarId>>>,
    /// Price per timeslot of each instance class (problem order).
    pub price_per_slot: Vec<f64>,
    /// Performance per timeslot of each (class, app) pair (problem order).
    pub perf_per_slot: Vec<Vec<f64>>,
}

/// Builds the MILP described by `spec`.
pub fn formulate(spec: &LpSpec) -> (Formulation, VarMaps) {
    let problem = spec.problem;
    let slot = problem
        .timeslot_unit()
        .expect("problem was validated to have workloads");
    let apps = problem.apps();

    let mut maps = cook(problem, slot);
    let mut lp = Formulation::default();

    create_variables(spec, &apps, &mut maps, &mut lp);
    set_objective(spec, &apps, &maps, &mut lp);
    performance_constraints(spec, &maps, &mut lp);
    class_cap_constraints(spec, &maps, &mut lp);
    fixed_reserved_constraints(spec, &maps, &mut lp);
    limiting_set_constraints(spec, &maps, &mut lp);

    (lp, maps)
}

/// Splits the classes into reserved / on-demand and converts prices and
/// performances to the workload timeslot unit.
fn cook(problem: &Problem, slot: TimeUnit) -> VarMaps {
    let perf_factor = problem.performances.time_unit.factor_to(slot);
    let apps = problem.apps();
    let mut reserved = Vec::new();
    let mut ondemand = Vec::new();
    let mut price_per_slot = Vec::new();
    let mut perf_per_slot = Vec::new();
    for (k, iclass) in problem.instance_classes.iter().enumerate() {
        if iclass.is_reserved {
            reserved.push(k);
        } else {
            ondemand.push(k);
        }
        price_per_slot.push(iclass.price_per_slot(slot));
        perf_per_slot.push(
            apps.iter()
                .map(|app| {
                    problem
                        .performances
                        .values
                        .get(&iclass.id, &app.id)
                        .expect("problem was validated to have all performances")
                        / perf_factor
                })
                .collect(),
        );
    }
    VarMaps {
        reserved,
        ondemand,
        y: Vec::new(),
        x: Vec::new(),
        price_per_slot,
        perf_per_slot,
    }
}

fn create_variables(
    spec: &LpSpec,
    apps: &[&crate::model::App],
    maps: &mut VarMaps,
    lp: &mut Formulation,
) {
    for &k in &maps.reserved {
        let iclass = &spec.problem.instance_classes[k];
        let row = apps
            .iter()
            .map(|app| lp.add_var(format!("Y_{}_{}", iclass.id, app.id), 0., None))
            .collect();
        maps.y.push(row);
    }
    for level in 0..spec.levels.len() {
        let mut per_class = Vec::new();
        for &k in &maps.ondemand {
            let iclass = &spec.problem.instance_classes[k];
            let row = apps
                .iter()
                .map(|app| {
                    // Guided lower bounds apply only to the nominal program;
                    // the fallback drops them.
                    let lb = match (spec.goal, spec.guided) {
                        (Goal::MinimizeCost, Some(guided)) => {
                            guided.get(&iclass.id, &app.id) as f64
                        }
                        _ => 0.,
                    };
                    lp.add_var(
                        format!("X_{}_{}_{}", iclass.id, app.id, level),
                        lb,
                        None,
                    )
                })
                .collect();
            per_class.push(row);
        }
        maps.x.push(per_class);
    }
}

fn set_objective(
    spec: &LpSpec,
    apps: &[&crate::model::App],
    maps: &VarMaps,
    lp: &mut Formulation,
) {
    let mut terms = Vec::new();
    match spec.goal {
        Goal::MinimizeCost => {
            // Reserved VMs are paid for the full period; on-demand VMs are
            // paid per timeslot of use, weighted by the level repetitions.
            let period: u64 = spec.repeats.iter().sum();
            for (r, &k) in maps.reserved.iter().enumerate() {
                for a in 0..apps.len() {
                    terms.push((maps.y[r][a], maps.price_per_slot[k] * period as f64));
                }
            }
            for (level, &reps) in spec.repeats.iter().enumerate() {
                for (d, &k) in maps.ondemand.iter().enumerate() {
                    for a in 0..apps.len() {
                        terms.push((maps.x[level][d][a], maps.price_per_slot[k] * reps as f64));
                    }
                }
            }
            lp.sense = ObjectiveSense::Minimize;
        }
        Goal::MaximizeServedFraction => {
            // Single timeslot: maximize the sum over apps of the served
            // fraction of their workload. Apps with no workload contribute
            // nothing.
            let load = &spec.levels[0];
            for (r, &k) in maps.reserved.iter().enumerate() {
                for a in 0..apps.len() {
                    if load[a] > 0 {
                        terms.push((maps.y[r][a], maps.perf_per_slot[k][a] / load[a] as f64));
                    }
                }
            }
            for (d, &k) in maps.ondemand.iter().enumerate() {
                for a in 0..apps.len() {
                    if load[a] > 0 {
                        terms.push((maps.x[0][d][a], maps.perf_per_slot[k][a] / load[a] as f64));
                    }
                }
            }
            lp.sense = ObjectiveSense::Maximize;
        }
    }
    lp.objective = terms;
}

/// Performance constraint: for each level and app, the performance given by
/// the allocation must reach the workload (nominal goal), or must not
/// exceed it (fallback goal).
fn performance_constraints(spec: &LpSpec, maps: &VarMaps, lp: &mut Formulation) {
    let sense = match spec.goal {
        Goal::MinimizeCost => ConstraintSense::Geq,
        Goal::MaximizeServedFraction => ConstraintSense::Leq,
    };
    for (level, load) in spec.levels.iter().enumerate() {
        for (a, &w) in load.iter().enumerate() {
            let mut terms = Vec::new();
            for (r, &k) in maps.reserved.iter().enumerate() {
                terms.push((maps.y[r][a], maps.perf_per_slot[k][a]));
            }
            for (d, &k) in maps.ondemand.iter().enumerate() {
                terms.push((maps.x[level][d][a], maps.perf_per_slot[k][a]));
            }
            lp.add_constraint(terms, sense, w as f64);
        }
    }
}

/// Per-class `max_vms` caps. A cap of 0 means the class is unbounded.
fn class_cap_constraints(spec: &LpSpec, maps: &VarMaps, lp: &mut Formulation) {
    let apps = spec.problem.workloads.len();
    for (r, &k) in maps.reserved.iter().enumerate() {
        let max_vms = spec.problem.instance_classes[k].max_vms;
        if max_vms == 0 {
            continue;
        }
        let terms = (0..apps).map(|a| (maps.y[r][a], 1.)).collect();
        lp.add_constraint(terms, ConstraintSense::Leq, max_vms as f64);
    }
    for (level, _) in spec.levels.iter().enumerate() {
        for (d, &k) in maps.ondemand.iter().enumerate() {
            let max_vms = spec.problem.instance_classes[k].max_vms;
            if max_vms == 0 {
                continue;
            }
            let terms = (0..apps).map(|a| (maps.x[level][d][a], 1.)).collect();
            lp.add_constraint(terms, ConstraintSense::Leq, max_vms as f64);
        }
    }
}

/// Phase II: the total of each reserved class is fixed to the number
/// purchased in Phase I. The split across apps remains free.
fn fixed_reserved_constraints(spec: &LpSpec, maps: &VarMaps, lp: &mut Formulation) {
    let Some(reserved) = spec.reserved else {
        return;
    };
    let apps = spec.problem.workloads.len();
    for (ic_id, vms) in reserved.iter() {
        let Some(r) = maps
            .reserved
            .iter()
            .position(|&k| spec.problem.instance_classes[k].id == ic_id)
        else {
            continue;
        };
        let terms = (0..apps).map(|a| (maps.y[r][a], 1.)).collect();
        lp.add_constraint(terms, ConstraintSense::Eq, vms as f64);
    }
}

/// Aggregate VM and core caps of every limiting set referenced by the
/// problem classes. Reserved classes contribute at every level through their
/// period-wide variables.
fn limiting_set_constraints(spec: &LpSpec, maps: &VarMaps, lp: &mut Formulation) {
    let problem = spec.problem;
    let apps = problem.workloads.len();

    // Forward index: unique limiting sets and the classes member of each.
    let mut sets: Vec<(&LimitingSet, Vec<usize>)> = Vec::new();
    for (k, iclass) in problem.instance_classes.iter().enumerate() {
        for lset in &iclass.limiting_sets {
            match sets.iter_mut().find(|(s, _)| s.id == lset.id) {
                Some((_, members)) => members.push(k),
                None => sets.push((lset, vec![k])),
            }
        }
    }

    for (lset, members) in &sets {
        for (level, _) in spec.levels.iter().enumerate() {
            if lset.max_vms > 0 {
                let terms = member_terms(maps, members, level, apps, |_| 1.);
                lp.add_constraint(terms, ConstraintSense::Leq, lset.max_vms as f64);
            }
            if lset.max_cores > 0. {
                let terms = member_terms(maps, members, level, apps, |k| {
                    spec.problem.instance_classes[k].cores
                });
                lp.add_constraint(terms, ConstraintSense::Leq, lset.max_cores);
            }
        }
    }
}

fn member_terms(
    maps: &VarMaps,
    members: &[usize],
    level: usize,
    apps: usize,
    weight: impl Fn(usize) -> f64,
) -> Vec<(VarId, f64)> {
    let mut terms = Vec::new();
    for (&k, a) in iproduct!(members, 0..apps) {
        if let Some(r) = maps.reserved.iter().position(|&i| i == k) {
            terms.push((maps.y[r][a], weight(k)));
        } else if let Some(d) = maps.ondemand.iter().position(|&i| i == k) {
            terms.push((maps.x[level][d][a], weight(k)));
        }
    }
    terms
}
