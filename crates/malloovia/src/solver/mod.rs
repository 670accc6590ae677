//! Backend contract and solve orchestration.
//!
//! The solver layer takes the abstract [`Formulation`] produced by the
//! formulators, loads it into an engine implementing [`MilpBackend`], runs
//! it with the configured limits and reads back the variable values. The
//! default engine is CBC ([`cbc::CbcBackend`]); any engine satisfying the
//! trait can be plugged in through a [`BackendFactory`].

pub mod cbc;

use std::time::Instant;

use log::debug;

use crate::lp::{ConstraintSense, Formulation, ObjectiveSense, VarId};

/// Options passed to the engine on every solve.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverConfig {
    /// Relative MILP optimality gap at which the engine may stop.
    pub frac_gap: Option<f64>,
    /// Wall-clock budget for one solve, in seconds.
    pub max_seconds: Option<f64>,
    /// Threads the engine may use internally.
    pub threads: u32,
    /// Seed for the engine randomization, when supported.
    pub seed: Option<i32>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            frac_gap: None,
            max_seconds: None,
            threads: 1,
            seed: None,
        }
    }
}

/// Termination condition reported by an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverStatus {
    Optimal,
    /// The LP relaxation itself is infeasible.
    Infeasible,
    /// The relaxation is feasible but no integer solution exists.
    IntegerInfeasible,
    /// The time limit elapsed before a proof was reached.
    Aborted,
    /// The engine failed internally.
    EngineError,
    Unknown,
}

/// The capability the orchestrator consumes. Implementations wrap one
/// concrete MILP engine.
///
/// Variable ids handed out by `add_integer_var` must be dense and
/// sequential, matching the order of insertion; the orchestrator relies on
/// them to mirror the ids of the loaded [`Formulation`].
pub trait MilpBackend {
    fn add_integer_var(&mut self, lb: f64, ub: Option<f64>, name: &str) -> VarId;
    fn add_constraint(&mut self, terms: &[(VarId, f64)], sense: ConstraintSense, rhs: f64);
    fn set_objective(&mut self, terms: &[(VarId, f64)], sense: ObjectiveSense);
    fn solve(&mut self, config: &SolverConfig) -> SolverStatus;
    /// Value of a variable in the incumbent solution.
    fn value(&self, var: VarId) -> f64;
    /// Objective value of the incumbent solution, if any.
    fn objective_value(&self) -> Option<f64>;
    /// Best objective bound known to the engine, if any.
    fn best_bound(&self) -> Option<f64>;
}

/// Builds a fresh backend for each solve. The handle lives for the duration
/// of one [`run`] call and is dropped afterwards, together with any engine
/// scratch state.
pub trait BackendFactory {
    fn create(&self) -> Box<dyn MilpBackend>;
}

/// Result of running one formulation through a backend.
#[derive(Clone, Debug)]
pub struct SolverOutput {
    pub status: SolverStatus,
    /// Objective value, present only on optimal termination.
    pub objective: Option<f64>,
    /// Values of all variables (formulation order), empty unless optimal.
    pub values: Vec<f64>,
    /// Engine best bound, present on aborted solves.
    pub lower_bound: Option<f64>,
    /// Seconds spent loading the formulation into the engine.
    pub creation_time: f64,
    /// Seconds spent in the engine.
    pub solving_time: f64,
}

/// Loads `formulation` into a fresh backend from `factory`, solves it and
/// extracts the results.
pub fn run(
    factory: &dyn BackendFactory,
    formulation: &Formulation,
    config: &SolverConfig,
) -> SolverOutput {
    let mut backend = factory.create();

    let start = Instant::now();
    for var in &formulation.vars {
        backend.add_integer_var(var.lb, var.ub, &var.name);
    }
    for constraint in &formulation.constraints {
        backend.add_constraint(&constraint.terms, constraint.sense, constraint.rhs);
    }
    backend.set_objective(&formulation.objective, formulation.sense);
    let creation_time = start.elapsed().as_secs_f64();

    debug!(
        "solving program with {} vars and {} constraints",
        formulation.vars.len(),
        formulation.constraints.len()
    );

    let start = Instant::now();
    let status = backend.solve(config);
    let solving_time = start.elapsed().as_secs_f64();

    let (objective, values) = if status == SolverStatus::Optimal {
        let values = (0..formulation.vars.len())
            .map(|i| backend.value(VarId(i)))
            .collect();
        (backend.objective_value(), values)
    } else {
        (None, Vec::new())
    };
    let lower_bound = if status == SolverStatus::Aborted {
        backend.best_bound()
    } else {
        None
    };

    debug!(
        "solve finished: {:?} in {:.3}s (creation {:.3}s)",
        status, solving_time, creation_time
    );

    SolverOutput {
        status,
        objective,
        values,
        lower_bound,
        creation_time,
        solving_time,
    }
}
