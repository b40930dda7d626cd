//! Search region selection
//!
//! Turns a search circle and the estimated quad density of an image into the
//! ordered list of (cell, density pass) units worth matching against.

use tracing::debug;

use crate::common::EquatorialCoords;
use crate::error::InputError;
use crate::index::{CellId, RaDecBounds, SkyIndex};
use crate::math::{angular_separation, circular_difference};

/// Ascending pass densities available per cell
pub trait PassLadder {
    /// Empty when the cell has no catalog
    fn pass_densities(&self, cell: CellId) -> &[f64];
}

/// The same ladder for every cell
#[derive(Debug, Clone, PartialEq)]
pub struct UniformLadder(Vec<f64>);

impl UniformLadder {
    pub fn new(mut densities: Vec<f64>) -> Result<Self, InputError> {
        if densities.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(InputError::InvalidParameter(
                "pass densities must be positive".to_string(),
            ));
        }
        densities.sort_by(|a, b| a.total_cmp(b));
        densities.dedup();
        Ok(Self(densities))
    }
}

impl PassLadder for UniformLadder {
    fn pass_densities(&self, _cell: CellId) -> &[f64] {
        &self.0
    }
}

/// How many passes below and above the best-matching density to search.
/// `None` means one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DensityOffsets {
    pub lower: Option<u8>,
    pub higher: Option<u8>,
}

impl DensityOffsets {
    pub const DEFAULT_OFFSET: u8 = 1;

    pub fn new(lower: u8, higher: u8) -> Self {
        Self {
            lower: Some(lower),
            higher: Some(higher),
        }
    }

    pub fn lower(&self) -> usize {
        self.lower.unwrap_or(Self::DEFAULT_OFFSET) as usize
    }

    pub fn higher(&self) -> usize {
        self.higher.unwrap_or(Self::DEFAULT_OFFSET) as usize
    }
}

/// One (cell, pass) pair to match against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchUnit {
    pub cell: CellId,
    pub pass_index: usize,
    pub density: f64,
    /// Distance from the search centre to the nearest point of the cell, degrees
    pub distance: f64,
    pub center: EquatorialCoords,
    pub radius: f64,
}

/// Nearest point of `bounds` to `center`, considering only what a circle of
/// `radius` can reach. `None` if the declination ranges do not overlap.
fn nearest_point(bounds: &RaDecBounds, center: &EquatorialCoords, radius: f64) -> Option<(f64, f64)> {
    let (ra, dec) = (center.ra(), center.dec());
    if bounds.dec_top < dec - radius || bounds.dec_bottom > dec + radius {
        return None;
    }
    if bounds.spans_dec(dec) && bounds.contains_ra_strictly(ra) {
        return Some((ra, dec));
    }

    let reaches_north = dec + radius >= 90.0 && bounds.dec_top >= 90.0;
    let reaches_south = dec - radius <= -90.0 && bounds.dec_bottom <= -90.0;
    if reaches_north {
        return Some((ra, 90.0));
    }
    if reaches_south {
        return Some((ra, -90.0));
    }

    let near_dec = dec.clamp(bounds.dec_bottom, bounds.dec_top);
    let near_ra = if bounds.contains_ra_strictly(ra) {
        ra
    } else if circular_difference(ra, bounds.ra_left) <= circular_difference(ra, bounds.ra_right) {
        bounds.ra_left
    } else {
        bounds.ra_right
    };
    Some((near_ra, near_dec))
}

/// Great-circle distance from `center` to the nearest point of the cell
/// reachable within `radius`; infinite when the declination ranges miss.
pub fn nearest_distance(bounds: &RaDecBounds, center: &EquatorialCoords, radius: f64) -> f64 {
    match nearest_point(bounds, center, radius) {
        None => f64::INFINITY,
        Some((ra, dec)) if ra == center.ra() && dec == center.dec() => 0.0,
        Some((ra, dec)) => angular_separation(center.ra(), center.dec(), ra, dec),
    }
}

/// Does any part of the cell lie within `radius` degrees of `center`?
pub fn is_cell_in_search_radius(bounds: &RaDecBounds, center: &EquatorialCoords, radius: f64) -> bool {
    nearest_distance(bounds, center, radius) <= radius
}

/// Index of the density closest to `target`; ties go to the lower pass
fn nearest_pass(densities: &[f64], target: f64) -> Option<usize> {
    densities
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - target).abs().total_cmp(&(*b - target).abs()))
        .map(|(i, _)| i)
}

/// Picks search units from a sky index and a pass ladder
pub struct RegionSelector<'a, L: PassLadder + ?Sized> {
    index: &'a SkyIndex,
    ladder: &'a L,
}

impl<'a, L: PassLadder + ?Sized> RegionSelector<'a, L> {
    pub fn new(index: &'a SkyIndex, ladder: &'a L) -> Self {
        Self { index, ladder }
    }

    /// Units for every cell within `radius` of `center`, nearest cells first,
    /// then by distance from the best-matching pass.
    ///
    /// An empty list is a valid answer.
    ///
    /// # Errors
    /// [InputError::InvalidParameter] unless `0 < radius <= 180` and
    /// `image_density` is finite and non-negative.
    pub fn select_units(
        &self,
        center: EquatorialCoords,
        radius: f64,
        image_density: f64,
        offsets: DensityOffsets,
    ) -> Result<Vec<SearchUnit>, InputError> {
        if !(radius > 0.0 && radius <= 180.0) {
            return Err(InputError::InvalidParameter(format!(
                "search radius must be in (0, 180], got {radius}"
            )));
        }
        if !image_density.is_finite() || image_density < 0.0 {
            return Err(InputError::InvalidParameter(format!(
                "image density must be finite and non-negative, got {image_density}"
            )));
        }

        // (unit, passes away from the best one)
        let mut units: Vec<(SearchUnit, usize)> = Vec::new();
        for band in self.index.bands() {
            if band.dec_top < center.dec() - radius || band.dec_bottom > center.dec() + radius {
                continue;
            }
            let first = band.first_cell.index();
            for cell in &self.index.cells()[first..first + band.cell_count as usize] {
                let distance = nearest_distance(&cell.bounds, &center, radius);
                if distance > radius {
                    continue;
                }
                let densities = self.ladder.pass_densities(cell.id);
                let Some(best) = nearest_pass(densities, image_density) else {
                    continue;
                };
                let lo = best.saturating_sub(offsets.lower());
                let hi = (best + offsets.higher()).min(densities.len() - 1);
                for pass_index in lo..=hi {
                    units.push((
                        SearchUnit {
                            cell: cell.id,
                            pass_index,
                            density: densities[pass_index],
                            distance,
                            center,
                            radius,
                        },
                        pass_index.abs_diff(best),
                    ));
                }
            }
        }

        units.sort_by(|(a, da), (b, db)| {
            a.distance
                .total_cmp(&b.distance)
                .then(da.cmp(db))
                .then(a.cell.cmp(&b.cell))
                .then(a.pass_index.cmp(&b.pass_index))
        });
        debug!(
            "{} search units around ({:.3}, {:.3}) r {:.3}",
            units.len(),
            center.ra(),
            center.dec(),
            radius
        );
        Ok(units.into_iter().map(|(u, _)| u).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn coords(ra: f64, dec: f64) -> EquatorialCoords {
        EquatorialCoords::new(ra, dec).unwrap()
    }

    fn bounds(ra_left: f64, ra_right: f64, dec_bottom: f64, dec_top: f64) -> RaDecBounds {
        RaDecBounds {
            ra_left,
            ra_right,
            dec_top,
            dec_bottom,
        }
    }

    #[test]
    fn test_wrapping_cell_is_near_across_the_seam() {
        // cell 350..10 at the equator; centre at RA 5 lies inside it
        let cell = bounds(350.0, 10.0, -5.0, 5.0);
        assert_eq!(nearest_distance(&cell, &coords(5.0, 0.0), 1.0), 0.0);
        // RA 12 is 2 degrees past the right edge, not 338 degrees
        assert_relative_eq!(nearest_distance(&cell, &coords(12.0, 0.0), 3.0), 2.0, epsilon = 1e-9);
        // RA 347 is 3 degrees before the left edge
        assert_relative_eq!(nearest_distance(&cell, &coords(347.0, 0.0), 4.0), 3.0, epsilon = 1e-9);
        assert!(is_cell_in_search_radius(&cell, &coords(12.0, 0.0), 2.5));
        assert!(!is_cell_in_search_radius(&cell, &coords(12.0, 0.0), 1.5));
    }

    #[test]
    fn test_dec_range_rejects_early() {
        let cell = bounds(0.0, 20.0, 10.0, 20.0);
        assert_eq!(nearest_distance(&cell, &coords(10.0, 0.0), 5.0), f64::INFINITY);
        assert!(!is_cell_in_search_radius(&cell, &coords(10.0, 0.0), 5.0));
    }

    #[test]
    fn test_search_reaching_the_pole_includes_polar_cell() {
        let index = SkyIndex::default();
        let cap = index.cells().last().unwrap();
        let center = coords(180.0, 89.0);
        assert!(is_cell_in_search_radius(&cap.bounds, &center, 5.0));

        // the band below the cap is out of reach at 5 degrees, within reach at 12
        let below = index.cell_at_deg(0.0, 75.0).unwrap();
        assert!(!is_cell_in_search_radius(&below.bounds, &center, 5.0));
        assert!(is_cell_in_search_radius(&below.bounds, &center, 12.0));

        let units = RegionSelector::new(&index, &UniformLadder::new(vec![1.0]).unwrap())
            .select_units(center, 5.0, 1.0, DensityOffsets::default())
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].cell, cap.id);
    }

    #[test]
    fn test_nearest_point_collapses_onto_the_pole() {
        // a pole-touching cell on the far side of the pole
        let north = bounds(100.0, 140.0, 80.0, 90.0);
        let center = coords(300.0, 88.0);
        assert_relative_eq!(nearest_distance(&north, &center, 3.0), 2.0, epsilon = 1e-9);
        assert!(is_cell_in_search_radius(&north, &center, 3.0));

        let south = bounds(100.0, 140.0, -90.0, -80.0);
        let center = coords(300.0, -88.0);
        assert_relative_eq!(nearest_distance(&south, &center, 3.0), 2.0, epsilon = 1e-9);
        assert!(is_cell_in_search_radius(&south, &center, 3.0));

        let binding = SkyIndex::default();
        let cap = &binding.cells()[0];
        assert!(is_cell_in_search_radius(&cap.bounds, &coords(0.0, -89.0), 5.0));
    }

    #[test]
    fn test_select_units_orders_by_distance_then_pass() {
        let index = SkyIndex::default();
        let ladder = UniformLadder::new(vec![5.0, 10.0, 20.0, 40.0]).unwrap();
        let selector = RegionSelector::new(&index, &ladder);
        let center = coords(45.0, 25.0);
        let units = selector
            .select_units(center, 3.0, 19.0, DensityOffsets::default())
            .unwrap();

        let home = index.cell_at(&center).id;
        assert_eq!(units[0].cell, home);
        assert_eq!(units[0].distance, 0.0);
        // best pass first, then its neighbours
        assert_eq!(units[0].pass_index, 2);
        assert_eq!(units[1].cell, home);
        let home_passes: Vec<usize> = units.iter().filter(|u| u.cell == home).map(|u| u.pass_index).collect();
        assert_eq!(home_passes, vec![2, 1, 3]);
        assert!(units.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_density_offsets_are_clamped() {
        let index = SkyIndex::default();
        let ladder = UniformLadder::new(vec![5.0, 10.0, 20.0]).unwrap();
        let selector = RegionSelector::new(&index, &ladder);
        let center = coords(45.0, 25.0);
        let home = index.cell_at(&center).id;

        let units = selector
            .select_units(center, 0.5, 1.0, DensityOffsets::new(3, 7))
            .unwrap();
        let home_passes: Vec<usize> = units.iter().filter(|u| u.cell == home).map(|u| u.pass_index).collect();
        assert_eq!(home_passes, vec![0, 1, 2]);

        let units = selector
            .select_units(center, 0.5, 100.0, DensityOffsets::new(0, 0))
            .unwrap();
        assert!(units.iter().all(|u| u.pass_index == 2));
    }

    #[test]
    fn test_empty_ladder_yields_no_units() {
        let index = SkyIndex::default();
        let ladder = UniformLadder::new(vec![]).unwrap();
        let units = RegionSelector::new(&index, &ladder)
            .select_units(coords(0.0, 0.0), 10.0, 5.0, DensityOffsets::default())
            .unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn test_invalid_radius() {
        let index = SkyIndex::default();
        let ladder = UniformLadder::new(vec![1.0]).unwrap();
        let selector = RegionSelector::new(&index, &ladder);
        for r in [0.0, -1.0, 180.5, f64::NAN] {
            assert!(selector
                .select_units(coords(0.0, 0.0), r, 1.0, DensityOffsets::default())
                .is_err());
        }
        assert!(selector
            .select_units(coords(0.0, 0.0), 180.0, 1.0, DensityOffsets::default())
            .is_ok());
    }

    #[test]
    fn test_full_sky_radius_selects_every_cell() {
        let index = SkyIndex::new(6).unwrap();
        let ladder = UniformLadder::new(vec![1.0]).unwrap();
        let units = RegionSelector::new(&index, &ladder)
            .select_units(coords(10.0, 10.0), 180.0, 1.0, DensityOffsets::default())
            .unwrap();
        assert_eq!(units.len(), index.cell_count());
    }
}
