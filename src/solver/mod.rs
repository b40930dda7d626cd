//! Plate solvers
//!
//! [engine::QuadSolver] is the quad-matching solver built on the catalog
//! store; [common] holds the solver-agnostic types.

pub mod common;
pub mod engine;
pub mod fit;
pub mod lsq;
pub mod matcher;
pub mod quad;

pub use common::{
    Declination, DetectedStar, FieldOfView, FieldRadius, ImageMetadata, Orientation, Parity,
    PixelScale, PlateSolver, RightAscention, SearchParameters, Solution, SolveFailure,
    SolveOutcome,
};
pub use engine::QuadSolver;
pub use lsq::{fit_affine, solve_plate_constants, EquationOfCondition};
