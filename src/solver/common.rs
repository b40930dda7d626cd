//! Primitives and traits for plate solving
//!
//! Provides the [PlateSolver] trait as well as the [Solution] type
//! to help standardize plate solver implementations.
//!
//! Most types are simple newtype wrappers around [crate::math::Degree].
//!

use shrinkwraprs::Shrinkwrap;

use std::{error::Error, time::Duration};

use crate::common::{EquatorialCoords, WorldTransform};
use crate::index::CellId;
use crate::math::Degree;
use crate::region::DensityOffsets;

/// Plate Solver Trait
pub trait PlateSolver {
    type E: Error;

    fn solve(
        &self,
        stars: &[DetectedStar],
        image: &ImageMetadata,
        params: &SearchParameters,
    ) -> Result<SolveOutcome, Self::E>;
}

/// A star found in the image
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DetectedStar {
    /// pixels, origin top-left
    pub x: f64,
    pub y: f64,
    pub flux: f64,
}

/// Image dimensions in pixels
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
}

impl ImageMetadata {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Reference pixel of a solution: the image centre
    pub fn center(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    /// Half of the image diagonal in pixels
    pub fn half_diagonal(&self) -> f64 {
        (self.width as f64).hypot(self.height as f64) / 2.0
    }
}

/// Where to look and what to expect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParameters {
    pub center: EquatorialCoords,
    /// Search radius around `center`, degrees
    pub radius: f64,
    /// Guess at FoV (image height) to help seed plate solving.
    /// If this value is too inacurate plate solving may fail.
    pub fov_guess: FieldOfView,
    pub density_offsets: DensityOffsets,
    /// Give up after this long; `None` searches until exhausted
    pub timeout: Option<Duration>,
}

impl SearchParameters {
    pub fn new(center: EquatorialCoords, radius: f64, fov_guess: FieldOfView) -> Self {
        Self {
            center,
            radius,
            fov_guess,
            density_offsets: DensityOffsets::default(),
            timeout: None,
        }
    }

    pub fn with_density_offsets(mut self, offsets: DensityOffsets) -> Self {
        self.density_offsets = offsets;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a search that ran to completion
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    Solved(Solution),
    NoMatch(SolveFailure),
}

impl SolveOutcome {
    pub fn solution(&self) -> Option<&Solution> {
        match self {
            SolveOutcome::Solved(s) => Some(s),
            SolveOutcome::NoMatch(_) => None,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, SolveOutcome::Solved(_))
    }
}

/// Why nothing matched
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SolveFailure {
    pub units_searched: usize,
    /// Units that ended in an error rather than a clean miss
    pub units_failed: usize,
    /// Catalog quads that matched an image quad before verification
    pub candidates: usize,
}

/// Image handedness relative to the sky
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// Negative CD determinant
    #[default]
    Normal,
    Flipped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Results of plate solving an image
pub struct Solution {
    pub ra: RightAscention,
    pub dec: Declination,
    pub field_radius: FieldRadius,
    pub orientation: Orientation,
    pub pixel_scale: PixelScale,
    pub parity: Parity,
    pub transform: WorldTransform,
    pub matched_quads: usize,
    /// RMS residual of the matched quad centres, pixels
    pub residual_px: f64,
    pub cell: CellId,
    pub pass_density: f64,
}

impl Solution {
    /// Derive the solution values from a fitted transform
    pub fn from_transform(
        transform: WorldTransform,
        image: &ImageMetadata,
        matched_quads: usize,
        residual_px: f64,
        cell: CellId,
        pass_density: f64,
    ) -> Self {
        let [_, _, cd21, cd22] = transform.cd();
        let det = transform.determinant();
        let scale = det.abs().sqrt();
        let parity = if det < 0.0 {
            Parity::Normal
        } else {
            Parity::Flipped
        };
        let p = match parity {
            Parity::Normal => 1.0,
            Parity::Flipped => -1.0,
        };
        let center = transform.crval();
        Self {
            ra: RightAscention::new(center.ra()),
            dec: Declination::new(center.dec()),
            field_radius: FieldRadius::new(scale * image.half_diagonal()),
            orientation: Orientation::new((p * cd21).atan2(cd22).to_degrees()),
            pixel_scale: PixelScale::new(scale),
            parity,
            transform,
            matched_quads,
            residual_px,
            cell,
            pass_density,
        }
    }

    pub fn center(&self) -> EquatorialCoords {
        self.transform.crval()
    }
}

/// Right ascention
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd, Shrinkwrap)]
pub struct RightAscention(Degree);
impl RightAscention {
    pub fn new(deg: f64) -> Self {
        Self(Degree::new(deg))
    }
}

/// Declination
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd, Shrinkwrap)]
pub struct Declination(Degree);
impl Declination {
    pub fn new(deg: f64) -> Self {
        Self(Degree::new(deg))
    }
}

/// Field of view
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd, Shrinkwrap)]
pub struct FieldOfView(Degree);
impl FieldOfView {
    pub fn new(deg: f64) -> Self {
        Self(Degree::new(deg))
    }
}

/// Angular distance from the image centre to a corner
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd, Shrinkwrap)]
pub struct FieldRadius(Degree);
impl FieldRadius {
    pub fn new(deg: f64) -> Self {
        Self(Degree::new(deg))
    }
}

/// Image frame rotation
///
/// units: angle east of north
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd, Shrinkwrap)]
pub struct Orientation(Degree);
impl Orientation {
    pub fn new(deg: f64) -> Self {
        Self(Degree::new(deg))
    }
}

/// Pixel Scale
///
/// units: angle per pixel
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd, Shrinkwrap)]
pub struct PixelScale(Degree);
impl PixelScale {
    pub fn new(deg: f64) -> Self {
        Self(Degree::new(deg))
    }
}
