//! Plate fit from matched quad centres
//!
//! Catalog positions are projected onto the tangent plane, an affine map from
//! pixel offsets (relative to the image centre) to standard coordinates is
//! fitted, and the tangent point is moved to the fitted field centre until the
//! offset vanishes. Pairs whose pixel residual exceeds the limit are dropped
//! one at a time, worst first.

use glam::DVec3;
use tracing::trace;

use super::common::ImageMetadata;
use super::lsq::fit_affine;
use crate::common::{EquatorialCoords, WorldTransform};
use crate::error::DegenerateError;
use crate::math::{deproject, project, ra_dec_of, unit_vector};

/// Re-centering iterations of the tangent point
const MAX_RECENTER: usize = 5;
/// Tangent point offset treated as converged, degrees
const RECENTER_EPSILON: f64 = 1e-10;

/// An image position and the sky position it was matched to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMatch {
    /// pixels
    pub image: (f64, f64),
    /// (ra, dec) degrees
    pub sky: (f64, f64),
}

/// An accepted plate fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateFit {
    pub transform: WorldTransform,
    /// RMS pixel residual of the kept pairs
    pub rms_px: f64,
    pub kept: usize,
}

/// Fit a plate to `matches` once, without rejecting anything
pub fn fit_transform(
    matches: &[PointMatch],
    image: &ImageMetadata,
) -> Result<WorldTransform, DegenerateError> {
    let (cx, cy) = image.center();
    let sum = matches
        .iter()
        .fold(DVec3::ZERO, |acc, m| acc + unit_vector(m.sky.0, m.sky.1));
    if matches.is_empty() || sum.length() == 0.0 {
        return Err(DegenerateError::TooFewEquations(matches.len()));
    }
    let (mut ra0, mut dec0) = ra_dec_of(sum);

    let mut cd = [0.0; 4];
    for i in 0..MAX_RECENTER {
        let points: Vec<((f64, f64), (f64, f64))> = matches
            .iter()
            .filter_map(|m| {
                let standard = project(m.sky.0, m.sky.1, ra0, dec0)?;
                Some(((m.image.0 - cx, m.image.1 - cy), standard))
            })
            .collect();
        let [a, b, c, d, e, f] = fit_affine(&points)?;
        cd = [a, b, d, e];
        (ra0, dec0) = deproject(c, f, ra0, dec0);
        trace!("recenter {}: offset ({:.3e}, {:.3e}) deg", i, c, f);
        if c.abs() + f.abs() < RECENTER_EPSILON {
            break;
        }
    }

    // deproject keeps ra in [0, 360) and dec in [-90, 90]
    let crval = EquatorialCoords::wrapped(ra0, dec0.clamp(-90.0, 90.0))
        .map_err(|_| DegenerateError::Singular(f64::NAN))?;
    Ok(WorldTransform::new(cd, [cx, cy], crval))
}

/// Pixel distance between where `transform` puts `m.sky` and where it was seen
pub fn residual_px(transform: &WorldTransform, m: &PointMatch) -> f64 {
    let Ok(sky) = EquatorialCoords::wrapped(m.sky.0, m.sky.1) else {
        return f64::INFINITY;
    };
    match transform.world_to_pixel(sky) {
        Some((x, y)) => (x - m.image.0).hypot(y - m.image.1),
        None => f64::INFINITY,
    }
}

/// Fit with iterative outlier rejection.
///
/// Returns `Ok(None)` when fewer than `min_matches` pairs survive or the RMS
/// of the survivors exceeds `max_residual_px`.
pub fn fit_plate(
    matches: &[PointMatch],
    image: &ImageMetadata,
    max_residual_px: f64,
    min_matches: usize,
) -> Result<Option<PlateFit>, DegenerateError> {
    let min_matches = min_matches.max(3);
    let mut kept = matches.to_vec();

    loop {
        if kept.len() < min_matches {
            return Ok(None);
        }
        let transform = fit_transform(&kept, image)?;
        let residuals: Vec<f64> = kept.iter().map(|m| residual_px(&transform, m)).collect();

        let (worst, worst_residual) = residuals
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, 0.0));
        if worst_residual > max_residual_px {
            trace!("dropping pair with residual {:.2} px", worst_residual);
            kept.swap_remove(worst);
            continue;
        }

        let rms = (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt();
        if rms > max_residual_px {
            return Ok(None);
        }
        return Ok(Some(PlateFit {
            transform,
            rms_px: rms,
            kept: kept.len(),
        }));
    }
}
