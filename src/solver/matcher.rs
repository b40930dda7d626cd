//! Matching one search unit against the image quads

use tracing::debug;

use super::common::{ImageMetadata, Solution};
use super::fit::{fit_plate, PointMatch};
use super::quad::ImageQuadSet;
use crate::catalog::reader::CatalogReader;
use crate::config::SolverConfig;
use crate::error::CatalogError;
use crate::math::angular_separation;
use crate::region::SearchUnit;
use crate::scheduler::CancellationToken;

/// Records streamed between cancellation checks
const CANCEL_POLL_INTERVAL: usize = 256;
/// Quad pairs whose scale is further than this from the median are dropped
const MEDIAN_SCALE_TOLERANCE: f64 = 0.01;

/// What one unit produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitReport {
    pub solution: Option<Solution>,
    /// Catalog/image quad pairs that passed the ratio and scale tests
    pub candidates: usize,
    pub scanned: usize,
    /// The token was raised before the unit finished
    pub cancelled: bool,
}

/// Per-solve matching state shared by all units
#[derive(Debug, Clone)]
pub struct UnitMatcher {
    quads: ImageQuadSet,
    image: ImageMetadata,
    config: SolverConfig,
    /// Expected pixel scale, degrees per pixel
    scale_guess: f64,
    /// Expected distance from the image centre to a corner, degrees
    field_radius_guess: f64,
}

#[derive(Debug, Clone, Copy)]
struct QuadPair {
    point: PointMatch,
    scale: f64,
}

impl UnitMatcher {
    /// `fov` is the estimated angular height of the image in degrees
    pub fn new(quads: ImageQuadSet, image: ImageMetadata, config: SolverConfig, fov: f64) -> Self {
        let scale_guess = fov / image.height.max(1) as f64;
        Self {
            quads,
            image,
            config,
            scale_guess,
            field_radius_guess: scale_guess * image.half_diagonal(),
        }
    }

    pub fn image_quads(&self) -> &ImageQuadSet {
        &self.quads
    }

    /// Stream the unit's pass, collect quad pairs and try to fit a plate to them
    pub fn match_unit(
        &self,
        unit: &SearchUnit,
        reader: &mut CatalogReader,
        token: &CancellationToken,
    ) -> Result<UnitReport, CatalogError> {
        let reach = unit.radius + self.field_radius_guess;
        let (ra, dec) = (unit.center.ra(), unit.center.dec());
        let mut report = UnitReport::default();
        let mut pairs: Vec<QuadPair> = Vec::new();

        for (i, record) in reader.read_pass(unit.pass_index)?.enumerate() {
            if i % CANCEL_POLL_INTERVAL == 0 && token.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            let record = record?;
            report.scanned += 1;
            if angular_separation(ra, dec, record.center_ra, record.center_dec) > reach {
                continue;
            }
            for quad in self.quads.candidates(&record.ratios, self.config.quad_tolerance) {
                let scale = record.largest_edge as f64 / quad.largest;
                if (scale / self.scale_guess - 1.0).abs() > self.config.scale_tolerance {
                    continue;
                }
                pairs.push(QuadPair {
                    point: PointMatch {
                        image: quad.center,
                        sky: (record.center_ra, record.center_dec),
                    },
                    scale,
                });
            }
        }
        report.candidates = pairs.len();

        let consistent = consistent_scale(&pairs);
        if consistent.len() < self.config.min_quad_matches {
            debug!(
                "cell {} pass {}: {} candidates, {} consistent",
                unit.cell,
                unit.pass_index,
                pairs.len(),
                consistent.len()
            );
            return Ok(report);
        }
        if token.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        match fit_plate(
            &consistent,
            &self.image,
            self.config.max_residual_px,
            self.config.min_quad_matches,
        ) {
            Ok(Some(fit)) => {
                debug!(
                    "cell {} pass {}: fit {} pairs, rms {:.3} px",
                    unit.cell, unit.pass_index, fit.kept, fit.rms_px
                );
                report.solution = Some(Solution::from_transform(
                    fit.transform,
                    &self.image,
                    fit.kept,
                    fit.rms_px,
                    unit.cell,
                    unit.density,
                ));
            }
            Ok(None) => debug!("cell {} pass {}: fit rejected", unit.cell, unit.pass_index),
            Err(e) => debug!("cell {} pass {}: {}", unit.cell, unit.pass_index, e),
        }
        Ok(report)
    }
}

/// Pairs whose implied scale lies within 1% of the median
fn consistent_scale(pairs: &[QuadPair]) -> Vec<PointMatch> {
    if pairs.is_empty() {
        return Vec::new();
    }
    let mut scales: Vec<f64> = pairs.iter().map(|p| p.scale).collect();
    scales.sort_by(|a, b| a.total_cmp(b));
    let median = scales[scales.len() / 2];
    pairs
        .iter()
        .filter(|p| (p.scale / median - 1.0).abs() <= MEDIAN_SCALE_TOLERANCE)
        .map(|p| p.point)
        .collect()
}
