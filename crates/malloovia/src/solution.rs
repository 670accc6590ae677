//! Classes for storing and reporting solutions of malloovia problems.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::model::{InstanceClass, Problem};

/// Possible status of a malloovia solution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Optimal,
    Infeasible,
    IntegerInfeasible,
    /// Phase II outcome for a timeslot whose nominal problem was infeasible
    /// and the served-performance-maximising fallback was used instead.
    Overfull,
    /// The workload was all zeros, no solver run was needed.
    Trivial,
    /// The time limit elapsed before the engine could prove anything.
    Aborted,
    CbcError,
    Unknown,
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            Status::Optimal => "optimal",
            Status::Infeasible => "infeasible",
            Status::IntegerInfeasible => "integer_infeasible",
            Status::Overfull => "overfull",
            Status::Trivial => "trivial",
            Status::Aborted => "aborted",
            Status::CbcError => "cbc_error",
            Status::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

impl Status {
    /// Severity used to pick the "worst" status when aggregating a period.
    fn severity(&self) -> u32 {
        match self {
            Status::Optimal | Status::Trivial => 0,
            Status::Overfull => 1,
            Status::Infeasible => 2,
            Status::IntegerInfeasible => 3,
            Status::Aborted => 4,
            Status::CbcError => 5,
            Status::Unknown => 6,
        }
    }
}

/// Data related to the malloovia algorithm run, stored inside
/// [`SolvingStats`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MallooviaStats {
    /// Whether the GCD rescaling technique was applied.
    pub gcd: bool,
    pub status: Status,
    /// The divisor used by the GCD technique (1.0 when not applied).
    #[serde(default = "default_multiplier")]
    pub gcd_multiplier: f64,
    #[serde(default)]
    pub frac_gap: Option<f64>,
    #[serde(default)]
    pub max_seconds: Option<f64>,
    /// Best bound reported by the engine when the optimal solution was not
    /// reached (aborted solves).
    #[serde(default)]
    pub lower_bound: Option<f64>,
}

fn default_multiplier() -> f64 {
    1.0
}

/// Statistics gathered from the solution of Phase I, or of one single
/// timeslot in Phase II.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolvingStats {
    pub algorithm: MallooviaStats,
    /// Seconds spent building the program and loading it into the engine.
    pub creation_time: f64,
    /// Seconds spent inside the engine.
    pub solving_time: f64,
    pub optimal_cost: Option<f64>,
}

/// Aggregated statistics for a whole Phase II period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalSolvingStats {
    pub creation_time: f64,
    pub solving_time: f64,
    pub optimal_cost: Option<f64>,
    pub status: Status,
}

impl GlobalSolvingStats {
    /// Sums the per-timeslot statistics.
    ///
    /// The global status is `overfull` as soon as one timeslot overflowed,
    /// `optimal` when every timeslot is optimal or trivial, and the worst
    /// per-timeslot status otherwise. The global cost is unknown when any
    /// timeslot has no cost.
    pub fn from_timeslots(stats: &[SolvingStats]) -> Self {
        let statuses: Vec<Status> = stats.iter().map(|s| s.algorithm.status).collect();
        let status = if statuses.iter().any(|s| *s == Status::Overfull) {
            Status::Overfull
        } else if statuses.iter().all(|s| s.severity() == 0) {
            Status::Optimal
        } else {
            *statuses
                .iter()
                .max_by_key(|s| s.severity())
                .unwrap_or(&Status::Unknown)
        };
        let optimal_cost = stats
            .iter()
            .map(|s| s.optimal_cost)
            .sum::<Option<f64>>();
        Self {
            creation_time: stats.iter().map(|s| s.creation_time).sum(),
            solving_time: stats.iter().map(|s| s.solving_time).sum(),
            optimal_cost,
            status,
        }
    }
}

/// Number of reserved VMs of each class purchased for the whole reservation
/// period. Classes are referenced by id; `vms_number` is parallel to
/// `instance_classes`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReservedAllocation {
    pub instance_classes: Vec<String>,
    pub vms_number: Vec<u64>,
}

impl ReservedAllocation {
    pub fn iter(&self) -> impl Iterator<Item = (String, u64)> + '_ {
        self.instance_classes
            .iter()
            .cloned()
            .zip(self.vms_number.iter().copied())
    }

    pub fn total_vms(&self) -> u64 {
        self.vms_number.iter().sum()
    }
}

/// Allocation for a series of timeslots (or load levels).
///
/// `values[t][a][k]` is the number of VMs of instance class
/// `instance_classes[k]` serving app `apps[a]` during the timeslot (or load
/// level) `t`, whose workload tuple is `workload_tuples[t]` and which covers
/// `repeats[t]` timeslots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationInfo {
    pub apps: Vec<String>,
    pub instance_classes: Vec<String>,
    pub workload_tuples: Vec<Vec<u64>>,
    pub repeats: Vec<u64>,
    pub values: Vec<Vec<Vec<u64>>>,
    pub units: String,
}

/// Solution of Phase I (also used for one Phase II timeslot before
/// aggregation).
#[derive(Clone, Debug, PartialEq)]
pub struct SolutionI {
    pub id: String,
    pub problem_id: String,
    pub solving_stats: SolvingStats,
    pub reserved_allocation: Option<ReservedAllocation>,
    pub allocation: Option<AllocationInfo>,
}

/// Solution of a whole Phase II period.
#[derive(Clone, Debug, PartialEq)]
pub struct SolutionII {
    pub id: String,
    pub problem_id: String,
    pub previous_phase_id: String,
    pub solving_stats: Vec<SolvingStats>,
    pub global_solving_stats: GlobalSolvingStats,
    pub allocation: AllocationInfo,
}

/// Either kind of solution, as read from a solutions document.
#[derive(Clone, Debug, PartialEq)]
pub enum Solution {
    PhaseI(SolutionI),
    PhaseII(SolutionII),
}

impl Solution {
    pub fn id(&self) -> &str {
        match self {
            Solution::PhaseI(s) => &s.id,
            Solution::PhaseII(s) => &s.id,
        }
    }
}

/// A projection of an allocation into a different unit (cost, performance).
#[derive(Clone, Debug, PartialEq)]
pub struct AllocationSeries {
    pub apps: Vec<String>,
    pub instance_classes: Vec<String>,
    pub workload_tuples: Vec<Vec<u64>>,
    pub repeats: Vec<u64>,
    pub values: Vec<Vec<Vec<f64>>>,
    pub units: String,
}

fn project(
    alloc: &AllocationInfo,
    units: &str,
    cell: impl Fn(usize, usize, u64) -> f64,
) -> AllocationSeries {
    let values = alloc
        .values
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(a, per_app)| {
                    per_app
                        .iter()
                        .enumerate()
                        .map(|(k, &vms)| cell(a, k, vms))
                        .collect()
                })
                .collect()
        })
        .collect();
    AllocationSeries {
        apps: alloc.apps.clone(),
        instance_classes: alloc.instance_classes.clone(),
        workload_tuples: alloc.workload_tuples.clone(),
        repeats: alloc.repeats.clone(),
        values,
        units: units.to_string(),
    }
}

/// Cost of each element of the allocation: the VM counts multiplied by the
/// price of the corresponding instance class.
pub fn compute_allocation_cost(
    alloc: &AllocationInfo,
    instance_classes: &[InstanceClass],
) -> AllocationSeries {
    let prices: Vec<f64> = alloc
        .instance_classes
        .iter()
        .map(|id| {
            instance_classes
                .iter()
                .find(|ic| ic.id == *id)
                .map_or(0., |ic| ic.price)
        })
        .collect();
    project(alloc, "cost", |_, k, vms| vms as f64 * prices[k])
}

/// Performance given by each element of the allocation: the VM counts
/// multiplied by the performance of the corresponding (class, app) pair.
pub fn compute_allocation_performance(
    alloc: &AllocationInfo,
    problem: &Problem,
) -> AllocationSeries {
    project(alloc, "rph", |a, k, vms| {
        vms as f64
            * problem
                .performances
                .values
                .get(&alloc.instance_classes[k], &alloc.apps[a])
                .unwrap_or(0.)
    })
}
