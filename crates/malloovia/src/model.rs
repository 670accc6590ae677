//! Domain model: the immutable entities which define an allocation problem.
//!
//! All entities are plain owned values, built once (usually by the
//! [`yamlio`](crate::yamlio) reader or by hand in tests) and never mutated
//! afterwards. Identity of every entity is its `id` string.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::MallooviaError;

/// Length of the timeslot used by prices, performances and workloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "y")]
    Year,
    #[serde(rename = "h")]
    Hour,
    #[serde(rename = "m")]
    Minute,
    #[serde(rename = "s")]
    Second,
}

impl TimeUnit {
    fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Year => 365. * 24. * 60. * 60.,
            TimeUnit::Hour => 60. * 60.,
            TimeUnit::Minute => 60.,
            TimeUnit::Second => 1.,
        }
    }

    /// Returns how many units of `other` fit in one unit of `self`.
    ///
    /// For example `TimeUnit::Hour.factor_to(TimeUnit::Second)` is 3600.
    pub fn factor_to(&self, other: TimeUnit) -> f64 {
        self.seconds() / other.seconds()
    }
}

impl Display for TimeUnit {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TimeUnit::Year => write!(f, "y"),
            TimeUnit::Hour => write!(f, "h"),
            TimeUnit::Minute => write!(f, "m"),
            TimeUnit::Second => write!(f, "s"),
        }
    }
}

/// One of the applications whose workload has to be served.
#[derive(Clone, Debug, PartialEq)]
pub struct App {
    pub id: String,
    pub name: String,
}

impl App {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

/// Grouping of instance classes which share an aggregate cap on the number
/// of VMs and/or cores, e.g. a region or an availability zone.
///
/// A cap of 0 means "unbounded"; this overload is inherited from the
/// document format and kept on purpose.
#[derive(Clone, Debug, PartialEq)]
pub struct LimitingSet {
    pub id: String,
    pub name: String,
    pub max_vms: u64,
    pub max_cores: f64,
}

/// A purchasable VM type in a concrete pricing regime and location.
///
/// `price` is the cost of running one VM for one `time_unit`. `max_vms` is a
/// per-class cap, with 0 meaning "unbounded". Reserved classes are paid for
/// every timeslot of the reservation period whether used or not; on-demand
/// classes are paid per timeslot of use.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceClass {
    pub id: String,
    pub name: String,
    pub limiting_sets: Vec<LimitingSet>,
    pub max_vms: u64,
    pub price: f64,
    pub time_unit: TimeUnit,
    pub is_reserved: bool,
    pub cores: f64,
    pub is_private: bool,
}

impl InstanceClass {
    /// Price of one VM of this class for one timeslot of the given length.
    pub fn price_per_slot(&self, slot: TimeUnit) -> f64 {
        self.price / self.time_unit.factor_to(slot)
    }
}

/// Performance of every (instance class, app) pair, in requests per
/// `time_unit`.
#[derive(Clone, Debug, PartialEq)]
pub struct PerformanceSet {
    pub id: String,
    pub time_unit: TimeUnit,
    pub values: PerformanceValues,
}

/// Storage for the performance values, keyed by instance class id and app
/// id. Iteration order is deterministic (sorted by ids).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerformanceValues {
    perfs: BTreeMap<(String, String), f64>,
}

impl PerformanceValues {
    pub fn new(entries: impl IntoIterator<Item = (String, String, f64)>) -> Self {
        let mut perfs = BTreeMap::new();
        for (ic_id, app_id, value) in entries {
            perfs.insert((ic_id, app_id), value);
        }
        Self { perfs }
    }

    /// Performance of the pair (instance class, app), by their ids.
    pub fn get(&self, ic_id: &str, app_id: &str) -> Option<f64> {
        self.perfs
            .get(&(ic_id.to_string(), app_id.to_string()))
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.perfs
            .iter()
            .map(|((ic, app), v)| (ic.as_str(), app.as_str(), *v))
    }

    /// Returns a copy with every value divided by `divisor`.
    pub fn scaled_down(&self, divisor: f64) -> Self {
        Self {
            perfs: self
                .perfs
                .iter()
                .map(|(k, v)| (k.clone(), v / divisor))
                .collect(),
        }
    }
}

/// Workload prediction for one application: one non-negative integer request
/// count per timeslot.
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub id: String,
    pub description: Option<String>,
    pub app: App,
    pub time_unit: TimeUnit,
    pub values: Vec<u64>,
    /// Statistical distribution of the workload inside the timeslot. Not
    /// used by the solver, carried for external tools.
    pub intra_slot_distribution: Option<String>,
    /// Name of the file the values were read from, if any.
    pub filename: Option<String>,
}

/// A full problem: the infrastructure, the apps (through their workloads)
/// and the performance of every pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Problem {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub workloads: Vec<Workload>,
    pub instance_classes: Vec<InstanceClass>,
    pub performances: PerformanceSet,
}

impl Problem {
    /// Apps of the problem, in workload order.
    pub fn apps(&self) -> Vec<&App> {
        self.workloads.iter().map(|w| &w.app).collect()
    }

    /// Number of timeslots modelled by the workloads.
    pub fn timeslots(&self) -> usize {
        self.workloads.first().map_or(0, |w| w.values.len())
    }

    /// Timeslot length shared by all workloads.
    pub fn timeslot_unit(&self) -> Option<TimeUnit> {
        self.workloads.first().map(|w| w.time_unit)
    }

    /// Checks the structural consistency of the problem.
    ///
    /// Any violation is reported as [`MallooviaError::InvalidProblem`]; this
    /// is the only failure class raised as an error by the solver entry
    /// points.
    pub fn validate(&self) -> Result<(), MallooviaError> {
        if self.workloads.is_empty() {
            return Err(MallooviaError::InvalidProblem(format!(
                "problem {} has no workloads",
                self.id
            )));
        }
        if self.instance_classes.is_empty() {
            return Err(MallooviaError::InvalidProblem(format!(
                "problem {} has no instance classes",
                self.id
            )));
        }

        let length = self.workloads[0].values.len();
        if self.workloads.iter().any(|w| w.values.len() != length) {
            return Err(MallooviaError::InvalidProblem(
                "all workloads should have the same length".to_string(),
            ));
        }

        let unit = self.workloads[0].time_unit;
        if self.workloads.iter().any(|w| w.time_unit != unit) {
            return Err(MallooviaError::InvalidProblem(
                "all workloads should have the same time unit".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for workload in &self.workloads {
            if !seen.insert(workload.app.id.clone()) {
                return Err(MallooviaError::InvalidProblem(format!(
                    "app {} appears in more than one workload",
                    workload.app.id
                )));
            }
        }

        for iclass in &self.instance_classes {
            if iclass.cores < 1. {
                return Err(MallooviaError::InvalidProblem(format!(
                    "instance class {} has less than one core",
                    iclass.id
                )));
            }
            for workload in &self.workloads {
                match self.performances.values.get(&iclass.id, &workload.app.id) {
                    None => {
                        return Err(MallooviaError::InvalidProblem(format!(
                            "performance data for {} in {} is missing",
                            workload.app.id, iclass.id
                        )))
                    }
                    Some(value) if value < 0. => {
                        return Err(MallooviaError::InvalidProblem(format!(
                            "performance of {} in {} is negative",
                            workload.app.id, iclass.id
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}
