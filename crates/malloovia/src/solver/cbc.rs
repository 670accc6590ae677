//! CBC binding of the backend contract, through the `coin_cbc` crate.

use coin_cbc::{Col, Model, Sense, Solution};
use log::warn;

use crate::lp::{ConstraintSense, ObjectiveSense, VarId};
use crate::solver::{BackendFactory, MilpBackend, SolverConfig, SolverStatus};

/// Default factory: one fresh CBC model per solve.
#[derive(Clone, Copy, Debug, Default)]
pub struct CbcFactory;

impl BackendFactory for CbcFactory {
    fn create(&self) -> Box<dyn MilpBackend> {
        Box::new(CbcBackend::new())
    }
}

/// A CBC model being built, and its solution once solved.
pub struct CbcBackend {
    model: Model,
    cols: Vec<Col>,
    solution: Option<Solution>,
}

impl CbcBackend {
    pub fn new() -> Self {
        Self {
            model: Model::default(),
            cols: Vec::new(),
            solution: None,
        }
    }
}

impl Default for CbcBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MilpBackend for CbcBackend {
    fn add_integer_var(&mut self, lb: f64, ub: Option<f64>, _name: &str) -> VarId {
        let col = self.model.add_integer();
        self.model.set_col_lower(col, lb);
        if let Some(ub) = ub {
            self.model.set_col_upper(col, ub);
        }
        self.cols.push(col);
        VarId(self.cols.len() - 1)
    }

    fn add_constraint(&mut self, terms: &[(VarId, f64)], sense: ConstraintSense, rhs: f64) {
        let row = self.model.add_row();
        for (var, coeff) in terms {
            self.model.set_weight(row, self.cols[var.0], *coeff);
        }
        match sense {
            ConstraintSense::Leq => self.model.set_row_upper(row, rhs),
            ConstraintSense::Geq => self.model.set_row_lower(row, rhs),
            ConstraintSense::Eq => {
                self.model.set_row_lower(row, rhs);
                self.model.set_row_upper(row, rhs);
            }
        }
    }

    fn set_objective(&mut self, terms: &[(VarId, f64)], sense: ObjectiveSense) {
        for (var, coeff) in terms {
            self.model.set_obj_coeff(self.cols[var.0], *coeff);
        }
        self.model.set_obj_sense(match sense {
            ObjectiveSense::Minimize => Sense::Minimize,
            ObjectiveSense::Maximize => Sense::Maximize,
        });
    }

    fn solve(&mut self, config: &SolverConfig) -> SolverStatus {
        self.model.set_parameter("logLevel", "0");
        self.model.set_parameter("threads", &config.threads.to_string());
        if let Some(gap) = config.frac_gap {
            self.model.set_parameter("ratioGap", &gap.to_string());
        }
        if let Some(seconds) = config.max_seconds {
            self.model.set_parameter("seconds", &seconds.to_string());
        }
        if let Some(seed) = config.seed {
            self.model.set_parameter("randomCbcSeed", &seed.to_string());
        }

        let solution = self.model.solve();
        let status = {
            let raw = solution.raw();
            if raw.is_abandoned() {
                warn!("cbc abandoned the model due to numerical difficulties");
                SolverStatus::EngineError
            } else if raw.is_proven_optimal() {
                SolverStatus::Optimal
            } else if raw.is_proven_infeasible() {
                // CBC proves infeasibility of the MILP; when already the
                // initial LP relaxation was infeasible the cause is not the
                // integrality requirement.
                if raw.is_initial_solve_proven_primal_infeasible() {
                    SolverStatus::Infeasible
                } else {
                    SolverStatus::IntegerInfeasible
                }
            } else if raw.is_seconds_limit_reached() {
                SolverStatus::Aborted
            } else {
                SolverStatus::Unknown
            }
        };
        self.solution = Some(solution);
        status
    }

    fn value(&self, var: VarId) -> f64 {
        match &self.solution {
            Some(solution) => solution.col(self.cols[var.0]),
            None => 0.,
        }
    }

    fn objective_value(&self) -> Option<f64> {
        self.solution.as_ref().map(|s| s.raw().obj_value())
    }

    fn best_bound(&self) -> Option<f64> {
        self.solution
            .as_ref()
            .map(|s| s.raw().best_possible_value())
    }
}
