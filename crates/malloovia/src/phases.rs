//! High level `PhaseI` and `PhaseII` drivers of the two-phase method.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, info};

use crate::error::MallooviaError;
use crate::histogram::{gcd_multiplier, rescale_problem, LoadHistogram, LoadLevel};
use crate::lp::formulator::{formulate, Goal, GuidedBounds, LpSpec, VarMaps};
use crate::model::{Problem, Workload};
use crate::solution::{
    AllocationInfo, GlobalSolvingStats, MallooviaStats, ReservedAllocation, SolutionI, SolutionII,
    SolvingStats, Status,
};
use crate::solver::cbc::CbcFactory;
use crate::solver::{run, BackendFactory, SolverConfig, SolverStatus};

/// Options for one Phase I solve.
#[derive(Clone, Debug)]
pub struct SolveOptions {
    /// Apply the GCD rescaling technique when possible.
    pub gcd: bool,
    pub solver: SolverConfig,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            gcd: true,
            solver: SolverConfig::default(),
        }
    }
}

fn status_from_solver(status: SolverStatus) -> Status {
    match status {
        SolverStatus::Optimal => Status::Optimal,
        SolverStatus::Infeasible => Status::Infeasible,
        SolverStatus::IntegerInfeasible => Status::IntegerInfeasible,
        SolverStatus::Aborted => Status::Aborted,
        SolverStatus::EngineError => Status::CbcError,
        SolverStatus::Unknown => Status::Unknown,
    }
}

/// Ids of the problem classes in allocation order: reserved first, then
/// on-demand, keeping the problem order within each group.
fn class_order(problem: &Problem) -> Vec<String> {
    let mut ids: Vec<String> = problem
        .instance_classes
        .iter()
        .filter(|ic| ic.is_reserved)
        .map(|ic| ic.id.clone())
        .collect();
    ids.extend(
        problem
            .instance_classes
            .iter()
            .filter(|ic| !ic.is_reserved)
            .map(|ic| ic.id.clone()),
    );
    ids
}

/// Reads the solved variables back into one allocation row per level.
fn package_allocation(
    problem: &Problem,
    levels: &[LoadLevel],
    repeats: &[u64],
    maps: &VarMaps,
    values: &[f64],
) -> AllocationInfo {
    let apps: Vec<String> = problem.apps().iter().map(|a| a.id.clone()).collect();
    let mut rows = Vec::with_capacity(levels.len());
    for level in 0..levels.len() {
        let mut per_app = Vec::with_capacity(apps.len());
        for a in 0..apps.len() {
            let mut row = Vec::with_capacity(maps.reserved.len() + maps.ondemand.len());
            for r in 0..maps.reserved.len() {
                row.push(values[maps.y[r][a].0].round() as u64);
            }
            for d in 0..maps.ondemand.len() {
                row.push(values[maps.x[level][d][a].0].round() as u64);
            }
            per_app.push(row);
        }
        rows.push(per_app);
    }
    AllocationInfo {
        apps,
        instance_classes: class_order(problem),
        workload_tuples: levels.to_vec(),
        repeats: repeats.to_vec(),
        values: rows,
        units: "vms".to_string(),
    }
}

/// All-zero allocation with the same shape.
fn zero_allocation(problem: &Problem, levels: &[LoadLevel], repeats: &[u64]) -> AllocationInfo {
    let apps: Vec<String> = problem.apps().iter().map(|a| a.id.clone()).collect();
    let classes = class_order(problem);
    AllocationInfo {
        values: vec![vec![vec![0; classes.len()]; apps.len()]; levels.len()],
        apps,
        instance_classes: classes,
        workload_tuples: levels.to_vec(),
        repeats: repeats.to_vec(),
        units: "vms".to_string(),
    }
}

/// Interface to the solver for the first phase of the method: a single MILP
/// over the whole reservation horizon which decides the reserved pool.
///
/// ```no_run
/// # fn get_problem() -> malloovia::model::Problem { unimplemented!() }
/// use malloovia::phases::{PhaseI, SolveOptions};
///
/// let problem = get_problem();
/// let phase_i = PhaseI::new(&problem).unwrap();
/// let solution = phase_i.solve(&SolveOptions::default());
/// ```
pub struct PhaseI<'a> {
    problem: &'a Problem,
    factory: Box<dyn BackendFactory>,
}

impl<'a> PhaseI<'a> {
    /// Validates the problem and prepares a solver bound to CBC.
    pub fn new(problem: &'a Problem) -> Result<Self, MallooviaError> {
        problem.validate()?;
        Ok(Self {
            problem,
            factory: Box::new(CbcFactory),
        })
    }

    /// Replaces the MILP engine.
    pub fn with_backend(mut self, factory: Box<dyn BackendFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Creates the Phase I program, solves it and packages the solution.
    ///
    /// Solver-level failures (infeasible, aborted, engine errors) are
    /// reported through the solution statistics, never as errors.
    pub fn solve(&self, options: &SolveOptions) -> SolutionI {
        let problem = self.problem;
        let histogram = LoadHistogram::from_workloads(&problem.workloads);
        info!(
            "phase I of {}: {} timeslots collapsed into {} load levels",
            problem.id,
            histogram.timeslots(),
            histogram.levels.len()
        );

        if histogram.is_zero() {
            // Nothing to serve: skip the engine completely.
            return SolutionI {
                id: format!("solution_i_{}", problem.id),
                problem_id: problem.id.clone(),
                solving_stats: SolvingStats {
                    algorithm: MallooviaStats {
                        gcd: false,
                        status: Status::Trivial,
                        gcd_multiplier: 1.0,
                        frac_gap: options.solver.frac_gap,
                        max_seconds: options.solver.max_seconds,
                        lower_bound: None,
                    },
                    creation_time: 0.,
                    solving_time: 0.,
                    optimal_cost: Some(0.),
                },
                reserved_allocation: Some(ReservedAllocation {
                    instance_classes: problem
                        .instance_classes
                        .iter()
                        .filter(|ic| ic.is_reserved)
                        .map(|ic| ic.id.clone())
                        .collect(),
                    vms_number: problem
                        .instance_classes
                        .iter()
                        .filter(|ic| ic.is_reserved)
                        .map(|_| 0)
                        .collect(),
                }),
                allocation: Some(zero_allocation(
                    problem,
                    &histogram.levels,
                    &histogram.repeats,
                )),
            };
        }

        // The GCD technique shrinks every workload and performance value by
        // their common divisor; the allocation and the cost are unaffected.
        let mut gcd_used = false;
        let mut multiplier = 1u64;
        let scaled;
        let lp_problem = if options.gcd {
            match gcd_multiplier(problem) {
                Some(g) => {
                    debug!("applying gcd rescaling with multiplier {}", g);
                    gcd_used = true;
                    multiplier = g;
                    scaled = rescale_problem(problem, g);
                    &scaled
                }
                None => problem,
            }
        } else {
            problem
        };
        let lp_histogram = if multiplier > 1 {
            histogram.scaled_down(multiplier)
        } else {
            histogram.clone()
        };

        let start = Instant::now();
        let spec = LpSpec {
            problem: lp_problem,
            levels: &lp_histogram.levels,
            repeats: &lp_histogram.repeats,
            reserved: None,
            guided: None,
            goal: Goal::MinimizeCost,
        };
        let (formulation, maps) = formulate(&spec);
        let formulation_time = start.elapsed().as_secs_f64();

        let output = run(self.factory.as_ref(), &formulation, &options.solver);
        let status = status_from_solver(output.status);

        let mut reserved_allocation = None;
        let mut allocation = None;
        if status == Status::Optimal {
            let vms_number = maps
                .y
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|var| output.values[var.0].round() as u64)
                        .sum()
                })
                .collect();
            reserved_allocation = Some(ReservedAllocation {
                instance_classes: maps
                    .reserved
                    .iter()
                    .map(|&k| problem.instance_classes[k].id.clone())
                    .collect(),
                vms_number,
            });
            // Report the original (unscaled) workload tuples.
            allocation = Some(package_allocation(
                problem,
                &histogram.levels,
                &histogram.repeats,
                &maps,
                &output.values,
            ));
        }

        SolutionI {
            id: format!("solution_i_{}", problem.id),
            problem_id: problem.id.clone(),
            solving_stats: SolvingStats {
                algorithm: MallooviaStats {
                    gcd: gcd_used,
                    status,
                    gcd_multiplier: multiplier as f64,
                    frac_gap: options.solver.frac_gap,
                    max_seconds: options.solver.max_seconds,
                    lower_bound: output.lower_bound,
                },
                creation_time: formulation_time + output.creation_time,
                solving_time: output.solving_time,
                optimal_cost: output.objective,
            },
            reserved_allocation,
            allocation,
        }
    }
}

/// Solution of one Phase II timeslot.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeslotSolution {
    pub workload: LoadLevel,
    pub solving_stats: SolvingStats,
    /// Single-timeslot allocation; absent when even the fallback failed.
    pub allocation: Option<AllocationInfo>,
}

/// Produces the workload tuple of every timeslot of a stored prediction.
///
/// The adapter for replaying the workloads of a problem through
/// [`PhaseII::solve_period`]. Like any predictor it is finite, yields one
/// tuple per invocation and is not restartable.
pub struct OmniscientPredictor {
    tuples: Vec<LoadLevel>,
    next: usize,
}

impl OmniscientPredictor {
    pub fn new(workloads: &[Workload]) -> Result<Self, MallooviaError> {
        let timeslots = workloads.first().map_or(0, |w| w.values.len());
        if workloads.iter().any(|w| w.values.len() != timeslots) {
            return Err(MallooviaError::InvalidProblem(
                "all workloads should have the same length".to_string(),
            ));
        }
        let tuples = (0..timeslots)
            .map(|t| workloads.iter().map(|w| w.values[t]).collect())
            .collect();
        Ok(Self { tuples, next: 0 })
    }
}

impl Iterator for OmniscientPredictor {
    type Item = LoadLevel;

    fn next(&mut self) -> Option<LoadLevel> {
        let tuple = self.tuples.get(self.next).cloned();
        self.next += 1;
        tuple
    }
}

/// Solves Phase II, either for a single timeslot or for a whole period.
///
/// The reserved pool decided in Phase I is fixed; each timeslot re-optimizes
/// the on-demand allocation (and the split of the reserved pool across
/// apps). Solutions are memoized per workload tuple, so a period with few
/// distinct tuples only pays for the distinct solves.
pub struct PhaseII<'a> {
    problem: &'a Problem,
    reserved: ReservedAllocation,
    previous_phase_id: String,
    solver: SolverConfig,
    guided: Option<GuidedBounds>,
    factory: Box<dyn BackendFactory>,
    cache: HashMap<LoadLevel, TimeslotSolution>,
}

impl<'a> PhaseII<'a> {
    /// Prepares Phase II from a Phase I solution.
    ///
    /// The problem may differ from the Phase I one (that is the normal use:
    /// the short-term prediction replaces the long-term one) but must
    /// reference the same apps and reserved instance classes. A Phase I
    /// solution which is not optimal (or trivial) is rejected.
    pub fn new(problem: &'a Problem, phase_i: &SolutionI) -> Result<Self, MallooviaError> {
        problem.validate()?;
        let status = phase_i.solving_stats.algorithm.status;
        if !matches!(status, Status::Optimal | Status::Trivial) {
            return Err(MallooviaError::PreviousPhase(format!(
                "phase I solution has status {}",
                status
            )));
        }
        let reserved = phase_i.reserved_allocation.clone().ok_or_else(|| {
            MallooviaError::PreviousPhase(
                "phase I solution has no reserved allocation".to_string(),
            )
        })?;
        for (ic_id, _) in reserved.iter() {
            if !problem
                .instance_classes
                .iter()
                .any(|ic| ic.is_reserved && ic.id == ic_id)
            {
                return Err(MallooviaError::UnknownReference(format!(
                    "reserved instance class {} is not part of problem {}",
                    ic_id, problem.id
                )));
            }
        }
        Ok(Self {
            problem,
            reserved,
            previous_phase_id: phase_i.id.clone(),
            solver: SolverConfig::default(),
            guided: None,
            factory: Box::new(CbcFactory),
            cache: HashMap::new(),
        })
    }

    /// Replaces the engine options used for every timeslot.
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Keeps at least the given number of on-demand VMs running per
    /// (instance class, app), for every timeslot of this instance.
    pub fn with_guided_bounds(mut self, guided: GuidedBounds) -> Self {
        self.guided = guided.into();
        self
    }

    /// Replaces the MILP engine.
    pub fn with_backend(mut self, factory: Box<dyn BackendFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Solves one timeslot for the given workload tuple.
    ///
    /// Repeated tuples are answered from the cache, with a solving time of
    /// zero. If the nominal program is infeasible the timeslot is re-solved
    /// maximizing the served workload fraction and reported as `overfull`.
    pub fn solve_timeslot(&mut self, load: &[u64]) -> Result<TimeslotSolution, MallooviaError> {
        if load.len() != self.problem.workloads.len() {
            return Err(MallooviaError::InvalidProblem(format!(
                "workload tuple has {} values but the problem has {} apps",
                load.len(),
                self.problem.workloads.len()
            )));
        }
        if let Some(cached) = self.cache.get(load) {
            debug!("timeslot {:?} answered from the cache", load);
            let mut solution = cached.clone();
            solution.solving_stats.solving_time = 0.;
            return Ok(solution);
        }

        let solution = if load.iter().all(|&w| w == 0) && self.reserved.total_vms() == 0 {
            self.trivial_timeslot(load)
        } else {
            self.solve_timeslot_uncached(load)
        };
        self.cache.insert(load.to_vec(), solution.clone());
        Ok(solution)
    }

    fn trivial_timeslot(&self, load: &[u64]) -> TimeslotSolution {
        let levels = vec![load.to_vec()];
        TimeslotSolution {
            workload: load.to_vec(),
            solving_stats: SolvingStats {
                algorithm: MallooviaStats {
                    gcd: false,
                    status: Status::Trivial,
                    gcd_multiplier: 1.0,
                    frac_gap: self.solver.frac_gap,
                    max_seconds: self.solver.max_seconds,
                    lower_bound: None,
                },
                creation_time: 0.,
                solving_time: 0.,
                optimal_cost: Some(0.),
            },
            allocation: Some(zero_allocation(self.problem, &levels, &[1])),
        }
    }

    fn solve_timeslot_uncached(&self, load: &[u64]) -> TimeslotSolution {
        let levels = vec![load.to_vec()];
        let repeats = [1u64];

        let start = Instant::now();
        let spec = LpSpec {
            problem: self.problem,
            levels: &levels,
            repeats: &repeats,
            reserved: Some(&self.reserved),
            guided: self.guided.as_ref(),
            goal: Goal::MinimizeCost,
        };
        let (formulation, maps) = formulate(&spec);
        let mut creation_time = start.elapsed().as_secs_f64();

        let output = run(self.factory.as_ref(), &formulation, &self.solver);
        creation_time += output.creation_time;
        let mut solving_time = output.solving_time;
        let nominal_status = status_from_solver(output.status);

        let (status, optimal_cost, allocation) = if nominal_status == Status::Optimal {
            let allocation =
                package_allocation(self.problem, &levels, &repeats, &maps, &output.values);
            (Status::Optimal, output.objective, Some(allocation))
        } else {
            info!(
                "timeslot {:?} cannot be fully served, maximizing served workload",
                load
            );
            let start = Instant::now();
            let spec = LpSpec {
                problem: self.problem,
                levels: &levels,
                repeats: &repeats,
                reserved: Some(&self.reserved),
                guided: None,
                goal: Goal::MaximizeServedFraction,
            };
            let (formulation, maps) = formulate(&spec);
            creation_time += start.elapsed().as_secs_f64();

            let fallback = run(self.factory.as_ref(), &formulation, &self.solver);
            creation_time += fallback.creation_time;
            solving_time += fallback.solving_time;

            if fallback.status == SolverStatus::Optimal {
                let allocation =
                    package_allocation(self.problem, &levels, &repeats, &maps, &fallback.values);
                let cost = allocation_cost(&maps, &fallback.values);
                (Status::Overfull, Some(cost), Some(allocation))
            } else {
                (status_from_solver(fallback.status), None, None)
            }
        };

        TimeslotSolution {
            workload: load.to_vec(),
            solving_stats: SolvingStats {
                algorithm: MallooviaStats {
                    gcd: false,
                    status,
                    gcd_multiplier: 1.0,
                    frac_gap: self.solver.frac_gap,
                    max_seconds: self.solver.max_seconds,
                    lower_bound: output.lower_bound,
                },
                creation_time,
                solving_time,
                optimal_cost,
            },
            allocation,
        }
    }

    /// Solves a whole period by draining the predictor, one timeslot at a
    /// time, in sequence order.
    pub fn solve_period(
        &mut self,
        predictor: impl IntoIterator<Item = LoadLevel>,
    ) -> Result<SolutionII, MallooviaError> {
        let mut slots = Vec::new();
        for load in predictor {
            slots.push(self.solve_timeslot(&load)?);
        }
        if slots.is_empty() {
            return Err(MallooviaError::InvalidProblem(
                "the predictor yielded no timeslots".to_string(),
            ));
        }
        Ok(self.aggregate(&slots))
    }

    /// Builds the global solution from the per-timeslot ones.
    fn aggregate(&self, slots: &[TimeslotSolution]) -> SolutionII {
        let stats: Vec<SolvingStats> = slots.iter().map(|s| s.solving_stats.clone()).collect();
        let global_solving_stats = GlobalSolvingStats::from_timeslots(&stats);

        let apps: Vec<String> = self.problem.apps().iter().map(|a| a.id.clone()).collect();
        let classes = class_order(self.problem);
        let values = slots
            .iter()
            .map(|s| match &s.allocation {
                Some(alloc) => alloc.values[0].clone(),
                None => vec![vec![0; classes.len()]; apps.len()],
            })
            .collect();

        SolutionII {
            id: format!("solution_phase_ii_{}", self.problem.id),
            problem_id: self.problem.id.clone(),
            previous_phase_id: self.previous_phase_id.clone(),
            solving_stats: stats,
            global_solving_stats,
            allocation: AllocationInfo {
                apps,
                instance_classes: classes,
                workload_tuples: slots.iter().map(|s| s.workload.clone()).collect(),
                repeats: vec![1; slots.len()],
                values,
                units: "vms".to_string(),
            },
        }
    }
}

/// Monetary cost of a single-timeslot allocation, from the per-slot prices.
fn allocation_cost(maps: &VarMaps, values: &[f64]) -> f64 {
    let mut cost = 0.;
    for (r, &k) in maps.reserved.iter().enumerate() {
        for var in &maps.y[r] {
            cost += values[var.0].round() * maps.price_per_slot[k];
        }
    }
    for (d, &k) in maps.ondemand.iter().enumerate() {
        for var in &maps.x[0][d] {
            cost += values[var.0].round() * maps.price_per_slot[k];
        }
    }
    cost
}
