//! Blind-ish astrometric plate solving in rust
//!
//! The sky is partitioned into cells ([index]); each cell has an offline-built
//! quad catalog stratified by density ([catalog]). A solve picks the cells and
//! passes around a guessed position ([region]), matches image quads against
//! them in parallel ([scheduler], [solver]) and fits plate constants to the
//! matches.
//!
//! ```no_run
//! use std::sync::Arc;
//! use starbot::catalog::CatalogSet;
//! use starbot::common::EquatorialCoords;
//! use starbot::index::SkyIndex;
//! use starbot::solver::{
//!     DetectedStar, FieldOfView, ImageMetadata, PlateSolver, QuadSolver, SearchParameters,
//! };
//! use starbot::SolverConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalogs = Arc::new(CatalogSet::open("catalogs", Arc::new(SkyIndex::default()))?);
//! let solver = QuadSolver::from_config(catalogs, SolverConfig::default())?;
//!
//! let stars: Vec<DetectedStar> = Vec::new(); // from a star detector
//! let params = SearchParameters::new(EquatorialCoords::new(83.8, -5.4)?, 10.0, FieldOfView::new(1.5));
//! let outcome = solver.solve(&stars, &ImageMetadata::new(3000, 2000), &params)?;
//! if let Some(solution) = outcome.solution() {
//!     println!("centre ({}, {})", solution.ra.degrees(), solution.dec.degrees());
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod common;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod math;
pub mod region;
pub mod scheduler;
pub mod solver;

pub use config::SolverConfig;
pub use error::{CatalogError, DegenerateError, InputError, JobError, SolveError, SubmitError};
pub use scheduler::{CancellationToken, JobHandle, Scheduler};
