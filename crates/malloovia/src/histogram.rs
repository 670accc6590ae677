//! Workload histogram: collapses the per-app workload sequences into unique
//! load-level tuples with repetition counts, and the optional GCD rescaling
//! which shrinks the integer coefficients submitted to the solver.

use std::collections::BTreeMap;

use crate::model::{Problem, Workload};

/// Workload of every app at one timeslot, ordered as the problem workloads.
pub type LoadLevel = Vec<u64>;

/// The collapsed representation of a workload prediction: the unique load
/// levels observed over the horizon, how many timeslots each one covers,
/// and which level every timeslot maps to.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadHistogram {
    /// Unique load levels, in ascending lexicographic order.
    pub levels: Vec<LoadLevel>,
    /// How many timeslots repeat each level. Sums to the horizon length.
    pub repeats: Vec<u64>,
    /// Position in `levels` of the tuple observed at each timeslot.
    pub index: Vec<usize>,
}

impl LoadHistogram {
    /// Builds the histogram by zipping the workload value sequences into one
    /// tuple per timeslot and counting the unique tuples.
    ///
    /// The workloads must have equal lengths (checked by
    /// [`Problem::validate`] before any solve).
    pub fn from_workloads(workloads: &[Workload]) -> Self {
        let timeslots = workloads.first().map_or(0, |w| w.values.len());
        let mut counts: BTreeMap<LoadLevel, u64> = BTreeMap::new();
        let mut tuples = Vec::with_capacity(timeslots);
        for t in 0..timeslots {
            let tuple: LoadLevel = workloads.iter().map(|w| w.values[t]).collect();
            *counts.entry(tuple.clone()).or_insert(0) += 1;
            tuples.push(tuple);
        }

        let levels: Vec<LoadLevel> = counts.keys().cloned().collect();
        let repeats: Vec<u64> = counts.values().copied().collect();
        let positions: BTreeMap<&LoadLevel, usize> =
            levels.iter().enumerate().map(|(i, l)| (l, i)).collect();
        let index = tuples.iter().map(|t| positions[t]).collect();

        Self {
            levels,
            repeats,
            index,
        }
    }

    /// Number of timeslots covered by the histogram.
    pub fn timeslots(&self) -> u64 {
        self.repeats.iter().sum()
    }

    /// True when every load level is all zeros (no workload at all).
    pub fn is_zero(&self) -> bool {
        self.levels.iter().all(|l| l.iter().all(|&w| w == 0))
    }

    /// Returns a copy with every workload value divided by `divisor`.
    pub fn scaled_down(&self, divisor: u64) -> Self {
        Self {
            levels: self
                .levels
                .iter()
                .map(|l| l.iter().map(|w| w / divisor).collect())
                .collect(),
            repeats: self.repeats.clone(),
            index: self.index.clone(),
        }
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Greatest common divisor of all workload values and all performance values
/// of the problem, or `None` when rescaling is not applicable.
///
/// Rescaling applies only when every performance value is a positive integer
/// (zeros are ignored, any fractional value disables the technique) and the
/// resulting divisor is greater than one.
pub fn gcd_multiplier(problem: &Problem) -> Option<u64> {
    let mut g: u64 = 0;
    for workload in &problem.workloads {
        for &value in &workload.values {
            g = gcd(g, value);
        }
    }
    for (_, _, perf) in problem.performances.values.iter() {
        if perf.fract() != 0. {
            return None;
        }
        g = gcd(g, perf as u64);
    }
    if g > 1 {
        Some(g)
    } else {
        None
    }
}

/// Returns a copy of the problem with workloads and performances divided by
/// `divisor`. The optimal allocation and cost of the rescaled problem are
/// the same as the original ones.
pub fn rescale_problem(problem: &Problem, divisor: u64) -> Problem {
    let mut scaled = problem.clone();
    for workload in &mut scaled.workloads {
        for value in &mut workload.values {
            *value /= divisor;
        }
    }
    scaled.performances.values = scaled.performances.values.scaled_down(divisor as f64);
    scaled
}
