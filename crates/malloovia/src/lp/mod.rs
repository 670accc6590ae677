//! Abstract MILP formulation layer.
//!
//! The formulators in [`formulator`] translate a problem into a
//! [`Formulation`]: a backend-independent description of integer variables,
//! linear constraints and the objective. The solver layer
//! ([`crate::solver`]) loads a formulation into a concrete engine.

pub mod formulator;

/// Handle of a decision variable inside a formulation.
///
/// Ids are dense and sequential: the n-th variable added to a formulation
/// (or to a backend) has id `n - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarId(pub usize);

/// Comparison sense of a linear constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintSense {
    Leq,
    Eq,
    Geq,
}

/// Direction of the objective function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectiveSense {
    Minimize,
    Maximize,
}

/// An integer decision variable with its bounds.
#[derive(Clone, Debug)]
pub struct VarDef {
    pub name: String,
    pub lb: f64,
    pub ub: Option<f64>,
}

/// A linear constraint `Σ coeff·var  sense  rhs`.
#[derive(Clone, Debug)]
pub struct ConstraintDef {
    pub terms: Vec<(VarId, f64)>,
    pub sense: ConstraintSense,
    pub rhs: f64,
}

/// A complete MILP: variables, constraints and objective.
#[derive(Clone, Debug, Default)]
pub struct Formulation {
    pub vars: Vec<VarDef>,
    pub constraints: Vec<ConstraintDef>,
    pub objective: Vec<(VarId, f64)>,
    pub sense: ObjectiveSense,
}

impl Default for ObjectiveSense {
    fn default() -> Self {
        ObjectiveSense::Minimize
    }
}

impl Formulation {
    pub fn add_var(&mut self, name: String, lb: f64, ub: Option<f64>) -> VarId {
        self.vars.push(VarDef { name, lb, ub });
        VarId(self.vars.len() - 1)
    }

    pub fn add_constraint(&mut self, terms: Vec<(VarId, f64)>, sense: ConstraintSense, rhs: f64) {
        self.constraints.push(ConstraintDef { terms, sense, rhs });
    }
}
