use thiserror::Error;

use crate::grid::slab::GridStatus;

/// Errors surfaced by the grid and the estimators.
///
/// Every error is fatal to the estimator call that raised it. Each rank
/// validates its preconditions before entering the first collective of a
/// pipeline, so a failing rank never leaves its peers stuck in a reduction.
#[derive(Debug, Error)]
pub enum SpectraError {
    #[error("grid is in {found:?} state, {expected:?} required")]
    StateMismatch {
        expected: GridStatus,
        found: GridStatus,
    },

    #[error("unknown kernel or filter '{0}'")]
    UnknownKernel(String),

    #[error("filter not defined for dimension {0}")]
    UnsupportedDim(usize),

    #[error("invalid binning: {0}")]
    BadBinning(String),

    #[error("invalid line of sight: {0}")]
    BadLineOfSight(String),

    #[error("precondition violated: {0}")]
    Precondition(String),
}

pub type Result<T> = std::result::Result<T, SpectraError>;
