//! Error taxonomy
//!
//! Each layer has its own error type; [SolveError] wraps them for the solve
//! entry point. A search that finds nothing is not an error, see
//! [crate::solver::SolveOutcome].

use std::time::Duration;

use thiserror::Error;

/// Malformed coordinates or parameters supplied by the caller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("right ascension {0} outside [0, 360)")]
    RaOutOfRange(f64),
    #[error("declination {0} outside [-90, 90]")]
    DecOutOfRange(f64),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("bad catalog row at line {line}: {reason}")]
    BadRow { line: usize, reason: String },
}

/// Corrupt or incompatible catalog file
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("unrecognized catalog header (magic {0:?})")]
    UnrecognizedHeader([u8; 4]),
    #[error("unsupported catalog version {found}, expected {expected}")]
    Version { found: u8, expected: u8 },
    #[error("corrupt catalog: {0}")]
    Format(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    /// True for header/version mismatches, which are raised before any quad data is read
    pub fn is_version_error(&self) -> bool {
        matches!(
            self,
            CatalogError::UnrecognizedHeader(_) | CatalogError::Version { .. }
        )
    }

    /// Maps short reads onto [CatalogError::Format], everything else stays an IO error
    pub(crate) fn from_read(err: std::io::Error, what: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            CatalogError::Format(format!("truncated {what}"))
        } else {
            CatalogError::Io(err)
        }
    }
}

/// Numerically singular least-squares system
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DegenerateError {
    #[error("need at least 3 equations of condition, got {0}")]
    TooFewEquations(usize),
    #[error("normal equations are singular (determinant {0:e})")]
    Singular(f64),
}

/// A job submitted to the [crate::scheduler::Scheduler] did not produce a value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error("job result channel disconnected")]
    Disconnected,
}

/// A job could not be queued
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmitError {
    #[error("queue stayed full until the deadline")]
    Timeout,
    #[error("scheduler is shut down")]
    Shutdown,
}

/// Solver runtime errors
#[derive(Error, Debug)]
pub enum SolveError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Degenerate(#[from] DegenerateError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("solve timed out after {0:?}")]
    Timeout(Duration),
    #[error("solve cancelled")]
    Cancelled,
}
