use thiserror::Error;

/// Top-level error for one controller cycle.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Invalid control configuration: {0}")]
    InvalidParameter(#[from] InvalidParameterError),
    #[error("Cycle input rejected: {0}")]
    Validation(#[from] ValidationError),
    #[error("Solve failed: {0}")]
    Solve(#[from] SolveFailure),
}

/// Bad static configuration. Fatal at startup; never produced mid-run.
#[derive(Clone, Debug, Error)]
#[error("parameter '{name}' has invalid value {value}: {reason}")]
pub struct InvalidParameterError {
    pub name: &'static str,
    pub value: f64,
    pub reason: &'static str,
}

impl InvalidParameterError {
    pub(crate) fn new(name: &'static str, value: f64, reason: &'static str) -> Self {
        Self {
            name,
            value,
            reason,
        }
    }
}

/// Which forecast axis a validation error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForecastAxis {
    Occupancy,
    OutdoorCo2,
}

impl std::fmt::Display for ForecastAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForecastAxis::Occupancy => write!(f, "occupancy"),
            ForecastAxis::OutdoorCo2 => write!(f, "outdoor CO2"),
        }
    }
}

/// Bad per-cycle input. Recoverable: the cycle is skipped and the fallback
/// policy applies; the solver is never invoked.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{axis} forecast has {actual} samples where {expected} were expected")]
    ForecastLength {
        axis: ForecastAxis,
        expected: usize,
        actual: usize,
    },
    #[error("{axis} forecast sample {index} has invalid value {value}")]
    ForecastValue {
        axis: ForecastAxis,
        index: usize,
        value: f64,
    },
    #[error("measured concentration {value} is not a usable reading")]
    Measurement { value: f64 },
}

/// Failure reported by a trajectory solver. Recoverable per cycle.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SolveFailure {
    #[error("problem is infeasible")]
    Infeasible,
    #[error("solver did not converge to a usable trajectory")]
    DidNotConverge,
    #[error("solve exceeded its time budget")]
    Timeout,
    #[error("numerical error during solve: {0}")]
    NumericalError(String),
}
