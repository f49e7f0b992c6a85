//! Error type shared by every module of the crate.

use crate::distributions::Family;

/// Errors returned by the inference routines.
///
/// Recoverable numerical problems (repaired grid points, overflowing grid
/// densities, truncated resampling, singular Hessians) are not errors: they are logged and reported on the
/// result objects instead.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum PsiError {
    #[error("length mismatch: {what} has length {actual}, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid prior: {0}")]
    InvalidPrior(String),

    #[error("cannot sample from an unconstrained prior")]
    UnconstrainedSample,

    #[error("unknown sigmoid {0:?}")]
    UnknownSigmoid(String),

    #[error("unknown core {0:?}")]
    UnknownCore(String),

    #[error("models with {0} parameters are not supported, expected 2 to 4")]
    UnsupportedParameterCount(usize),

    #[error(
        "parameter {param} ranges over [{lower}, {upper}], outside the support of its {family:?} posterior family"
    )]
    FamilyMismatch {
        param: usize,
        family: Family,
        lower: f64,
        upper: f64,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("optimizer failed: {0}")]
    OptimizerFailure(String),

    #[error("degenerate grid for parameter {param}: {reason}")]
    DegenerateGrid { param: usize, reason: &'static str },

    #[error("all {n_proposals} importance weights are zero or non-finite")]
    DegenerateWeights { n_proposals: usize },
}

pub type Result<T> = std::result::Result<T, PsiError>;
