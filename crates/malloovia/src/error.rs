//! Error types for malloovia.

use thiserror::Error;

/// Failures surfaced as errors by the crate.
///
/// Only structurally invalid input is reported this way. Solver-level
/// outcomes (infeasible, aborted, engine failures) are carried inside the
/// solution statistics and never raised as errors.
#[derive(Error, Debug)]
pub enum MallooviaError {
    #[error("invalid problem: {0}")]
    InvalidProblem(String),

    #[error("unknown reference: {0}")]
    UnknownReference(String),

    #[error("invalid document: {0}")]
    Document(String),

    #[error("previous phase is not usable: {0}")]
    PreviousPhase(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
